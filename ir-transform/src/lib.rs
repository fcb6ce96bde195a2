//! IR transforms: SSA construction, block-local common-subexpression
//! elimination, and CFG re-linearization.

pub mod cse;
pub mod linearize;
pub mod ssa;

pub use cse::eliminate_common_subexpressions;
pub use linearize::linearize;
pub use ssa::construct_ssa;
