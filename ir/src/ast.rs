//! The resolved AST the IR builder consumes.
//!
//! The frontend (lexer, parser, semantic analysis) is an external
//! collaborator; by the time a [FunctionAst] reaches the builder, every
//! identifier, operator and call has been bound to its declaration. The
//! builder never resolves names.

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::diagnostics::SourceSpan;
use crate::module::{FunctionId, PrimitiveClass, TypeId};
use crate::number::Number;

/// A handle to a local declaration (parameters included).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(u32);
entity_impl!(LocalId, "local");

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub name: String,
    pub ty: TypeId,
}

/// One function body, fully resolved.
#[derive(Debug, Clone)]
pub struct FunctionAst {
    /// The layout record this body belongs to.
    pub function: FunctionId,
    /// Parameter locals, in ABI order.
    pub params: Vec<LocalId>,
    pub locals: PrimaryMap<LocalId, LocalDecl>,
    pub body: Block,
}

impl FunctionAst {
    pub fn new(function: FunctionId) -> Self {
        Self {
            function,
            params: Vec::new(),
            locals: PrimaryMap::new(),
            body: Block::default(),
        }
    }

    pub fn local(&mut self, name: impl Into<String>, ty: TypeId) -> LocalId {
        self.locals.push(LocalDecl {
            name: name.into(),
            ty,
        })
    }

    pub fn param(&mut self, name: impl Into<String>, ty: TypeId) -> LocalId {
        let local = self.local(name, ty);
        self.params.push(local);
        local
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

impl Block {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            span: SourceSpan::UNKNOWN,
        }
    }

    pub fn with_span(kind: StmtKind, span: SourceSpan) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub struct ElseIf {
    pub cond: Expr,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Block),
    Expr(Expr),
    Decl {
        local: LocalId,
        init: Option<Expr>,
    },
    If {
        cond: Expr,
        then_body: Block,
        else_ifs: Vec<ElseIf>,
        else_body: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    DoWhile {
        body: Block,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Expr,
        step: Option<Expr>,
        body: Block,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    LogAnd,
    LogOr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PrefixOp {
    Increment,
    Decrement,
    Negate,
    LogicalNot,
    BitwiseNot,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

/// One step of a member access chain.
#[derive(Debug, Clone)]
pub enum Accessor {
    /// `.field` on a struct value; the offset equals the declaration index.
    Field {
        /// The struct type owning the field.
        owner: TypeId,
        index: u32,
        /// The field's declared type.
        ty: TypeId,
    },
    /// `.xyzw` selection. On a scalar source this broadcasts; on a vector
    /// source it permutes lanes by `mask`.
    Swizzle {
        mask: u32,
        source_class: PrimitiveClass,
        ty: TypeId,
    },
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
    /// The type the semantic pass inferred; `None` only for void calls in
    /// statement position.
    pub inferred: Option<TypeId>,
}

impl Expr {
    pub fn new(kind: ExprKind, inferred: Option<TypeId>) -> Self {
        Self {
            kind,
            span: SourceSpan::UNKNOWN,
            inferred,
        }
    }

    pub fn literal(value: Number, ty: TypeId) -> Self {
        Self::new(ExprKind::Literal(value), Some(ty))
    }

    pub fn local(local: LocalId, ty: TypeId) -> Self {
        Self::new(ExprKind::Local(local), Some(ty))
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Number),
    /// A bare reference to a local or parameter.
    Local(LocalId),
    /// `base.a.b...` member chain rooted at a local.
    Access {
        base: LocalId,
        chain: Vec<Accessor>,
    },
    Binary {
        op: BinOp,
        /// The resolved operator overload when the operation is not an
        /// intrinsic; `None` lowers straight to an opcode.
        overload: Option<FunctionId>,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Expr>,
    },
    Postfix {
        op: PostfixOp,
        operand: Box<Expr>,
    },
    Call {
        callee: FunctionId,
        args: Vec<Expr>,
        /// Constructor calls receive the preceding stack allocation as
        /// their implicit first argument.
        constructor: bool,
    },
    Cast {
        /// The resolved cast operator; `None` is an intrinsic conversion.
        overload: Option<FunctionId>,
        operand: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    CompoundAssign {
        op: BinOp,
        overload: Option<FunctionId>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
}
