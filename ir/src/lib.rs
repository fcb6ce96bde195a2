//! The HXSL intermediate representation.
//!
//! This crate is the middle-end core of the HXSL compiler: the operand and
//! instruction model, per-function metadata, the linear IR the frontend's
//! AST lowers into, basic blocks and the control-flow graph, the module
//! layout entities, and the deterministic binary module format.
//!
//! Dominator analysis lives in `hxsl-ir-analysis`, SSA construction in
//! `hxsl-ir-transform`, and direct execution in `hxsl-eval`.

pub mod arena;
pub mod ast;
pub mod blob;
pub mod builder;
pub mod cfg;
pub mod diagnostics;
pub mod display;
pub mod errors;
pub mod instruction;
pub mod metadata;
pub mod module;
pub mod number;
pub mod serialize;
pub mod value;

pub use blob::{CodeBlob, JumpTable};
pub use builder::build_function;
pub use cfg::{BlockData, BlockKind, ControlFlowGraph};
pub use diagnostics::{
    CapturedDiagnostics, Diagnostic, DiagnosticCode, DiagnosticsSink, NullSink, Severity,
    SourceSpan,
};
pub use errors::{ReadError, WriteError};
pub use instruction::{fold_imm, try_fold, InstNode, Instruction, Opcode};
pub use metadata::{Metadata, Variable, VariableFlags};
pub use module::{Module, ModuleBuilder};
pub use number::{Number, NumberType};
pub use serialize::{read_module, write_module};
pub use value::{FieldAccess, FuncRef, Inst, Label, Operand, PhiRef, TypeRef, VarId};
