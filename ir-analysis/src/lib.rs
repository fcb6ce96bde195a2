//! Control-flow analyses over the HXSL IR: the Lengauer–Tarjan dominator
//! tree with dominance frontiers, unreachable-block elimination, the
//! dominator-tree visitor, and the natural-loop forest.

pub mod dce;
pub mod domtree;
pub mod loops;
pub mod visitor;

pub use dce::{analyze, remove_unreachable};
pub use domtree::{DominatorTree, UNDEFINED};
pub use loops::{LoopNode, LoopTree};
pub use visitor::{traverse, DomTreeVisitor};
