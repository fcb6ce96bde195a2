use std::fmt;
use std::hash::{Hash, Hasher};

use intrusive_collections::{intrusive_adapter, LinkedListLink, UnsafeRef};
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::diagnostics::SourceSpan;
use crate::number::Number;
use crate::value::{FieldAccess, FuncRef, Inst, Label, Operand, PhiRef, TypeRef, VarId};

macro_rules! define_opcodes {
    ($($name:ident = $value:literal => $mnemonic:literal;)*) => {
        /// The flat opcode enumeration. Discriminants are stable and are
        /// what the binary encoding writes.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($name = $value,)*
        }

        impl Opcode {
            pub fn from_u16(raw: u16) -> Option<Self> {
                match raw {
                    $($value => Some(Self::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $(Self::$name => $mnemonic,)*
                }
            }
        }
    };
}

define_opcodes! {
    Nop = 0 => "nop";
    StackAlloc = 1 => "alloca";
    Zero = 2 => "zero";
    Store = 3 => "sta";
    Load = 4 => "lda";
    OffsetAddress = 5 => "offs";
    AddressOf = 6 => "addr";
    Push = 7 => "push";
    Pop = 8 => "pop";
    Move = 9 => "mov";
    Return = 10 => "ret";
    StoreParam = 11 => "starg";
    LoadParam = 12 => "ldarg";
    StoreRefParam = 13 => "strefarg";
    LoadRefParam = 14 => "ldrefarg";
    Call = 15 => "call";
    Jump = 16 => "jmp";
    JumpZero = 17 => "jz";
    JumpNotZero = 18 => "jnz";
    Cast = 19 => "cast";
    Discard = 20 => "discard";
    Phi = 21 => "phi";
    Add = 22 => "add";
    Subtract = 23 => "sub";
    Multiply = 24 => "mul";
    Divide = 25 => "div";
    Modulus = 26 => "rem";
    BitwiseShiftLeft = 27 => "bls";
    BitwiseShiftRight = 28 => "brs";
    AndAnd = 29 => "land";
    OrOr = 30 => "lor";
    BitwiseAnd = 31 => "and";
    BitwiseOr = 32 => "or";
    BitwiseXor = 33 => "xor";
    LessThan = 34 => "lt";
    LessThanOrEqual = 35 => "ltq";
    GreaterThan = 36 => "gt";
    GreaterThanOrEqual = 37 => "gtq";
    Equal = 38 => "eq";
    NotEqual = 39 => "neq";
    Increment = 40 => "inc";
    Decrement = 41 => "dec";
    LogicalNot = 42 => "lnot";
    BitwiseNot = 43 => "not";
    Negate = 44 => "neg";
    VecExtract = 45 => "v_extr";
    VecSetX = 46 => "v_setx";
    VecSetY = 47 => "v_sety";
    VecSetZ = 48 => "v_setz";
    VecSetW = 49 => "v_setw";
    BroadcastVec = 50 => "vec_bcast";
    VecSwizzle = 51 => "vec_swiz";
    VecAdd = 52 => "vec_add";
    VecSubtract = 53 => "vec_sub";
    VecMultiply = 54 => "vec_mul";
    VecDivide = 55 => "vec_div";
    VecFusedMultiplyAdd = 56 => "vec_fma";
    VecDot = 57 => "vec_dot";
    VecCross = 58 => "vec_crs";
    VecSaturate = 59 => "vec_sat";
    VecClamp = 60 => "vec_clamp";
    VecLerp = 61 => "vec_lerp";
}

impl Opcode {
    pub fn is_basic(&self) -> bool {
        matches!(self, Self::Nop | Self::Discard)
    }

    /// Unary operators producing a value from a single operand.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            Self::Zero
                | Self::Increment
                | Self::Decrement
                | Self::LogicalNot
                | Self::BitwiseNot
                | Self::Negate
                | Self::Cast
                | Self::AddressOf
                | Self::BroadcastVec
                | Self::VecSaturate
        )
    }

    /// Scalar binary operators: arithmetic, comparison, bitwise, logical.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Subtract
                | Self::Multiply
                | Self::Divide
                | Self::Modulus
                | Self::BitwiseShiftLeft
                | Self::BitwiseShiftRight
                | Self::AndAnd
                | Self::OrOr
                | Self::BitwiseAnd
                | Self::BitwiseOr
                | Self::BitwiseXor
                | Self::LessThan
                | Self::LessThanOrEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
                | Self::Equal
                | Self::NotEqual
        )
    }

    /// Vector operators with the two-operand shape.
    pub fn is_vec_binary(&self) -> bool {
        matches!(
            self,
            Self::VecExtract
                | Self::VecSetX
                | Self::VecSetY
                | Self::VecSetZ
                | Self::VecSetW
                | Self::VecSwizzle
                | Self::VecAdd
                | Self::VecSubtract
                | Self::VecMultiply
                | Self::VecDivide
                | Self::VecDot
                | Self::VecCross
        )
    }

    pub fn is_load_store(&self) -> bool {
        matches!(
            self,
            Self::Store
                | Self::Load
                | Self::LoadParam
                | Self::StoreParam
                | Self::StoreRefParam
                | Self::LoadRefParam
        )
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Self::Jump | Self::JumpZero | Self::JumpNotZero)
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call)
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Self::Return)
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi)
    }

    /// Ends a basic block: control never falls through.
    pub fn is_terminator(&self) -> bool {
        self.is_jump() || self.is_return() || matches!(self, Self::Discard)
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Multiply
                | Self::AndAnd
                | Self::OrOr
                | Self::BitwiseAnd
                | Self::BitwiseOr
                | Self::BitwiseXor
                | Self::Equal
                | Self::NotEqual
                | Self::VecAdd
                | Self::VecMultiply
        )
    }
}

/// Shape of an instruction as seen by construction, encoding and display:
/// which variant an opcode belongs to and how many operand slots its wire
/// form carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpShape {
    Basic,
    Ret,
    Call,
    Jump,
    Binary,
    Unary,
    StackAlloc,
    Offset,
    Load,
    Store,
    LoadParam,
    StoreParam,
    Move,
    Phi,
    Push,
    Pop,
    Prim,
}

impl Opcode {
    pub fn shape(&self) -> OpShape {
        match self {
            Self::Nop | Self::Discard => OpShape::Basic,
            Self::Return => OpShape::Ret,
            Self::Call => OpShape::Call,
            Self::Jump | Self::JumpZero | Self::JumpNotZero => OpShape::Jump,
            Self::StackAlloc => OpShape::StackAlloc,
            Self::OffsetAddress => OpShape::Offset,
            Self::Load => OpShape::Load,
            Self::Store => OpShape::Store,
            Self::LoadParam | Self::LoadRefParam => OpShape::LoadParam,
            Self::StoreParam | Self::StoreRefParam => OpShape::StoreParam,
            Self::Move => OpShape::Move,
            Self::Phi => OpShape::Phi,
            Self::Push => OpShape::Push,
            Self::Pop => OpShape::Pop,
            Self::VecFusedMultiplyAdd | Self::VecClamp | Self::VecLerp => OpShape::Prim,
            op if op.is_binary() || op.is_vec_binary() => OpShape::Binary,
            _ => OpShape::Unary,
        }
    }

    /// Number of operand slots in the wire encoding, including the result
    /// slot where the shape has one.
    pub fn slot_count(&self) -> usize {
        match self.shape() {
            OpShape::Basic => 0,
            OpShape::Ret | OpShape::Push | OpShape::Pop => 1,
            OpShape::Call
            | OpShape::Jump
            | OpShape::Unary
            | OpShape::StackAlloc
            | OpShape::Load
            | OpShape::Store
            | OpShape::LoadParam
            | OpShape::StoreParam
            | OpShape::Move
            | OpShape::Phi => 2,
            OpShape::Binary | OpShape::Offset => 3,
            OpShape::Prim => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicOp {
    pub op: Opcode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetOp {
    pub value: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallOp {
    /// Destination register; [VarId::INVALID] for void calls.
    pub dst: VarId,
    pub callee: FuncRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JumpOp {
    pub op: Opcode,
    pub target: Label,
    /// Tested operand for `jz`/`jnz`; absent for unconditional jumps.
    pub cond: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOp {
    pub op: Opcode,
    pub dst: VarId,
    pub lhs: Operand,
    pub rhs: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryOp {
    pub op: Opcode,
    pub dst: VarId,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackAllocOp {
    pub dst: VarId,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetOp {
    pub dst: VarId,
    pub base: Operand,
    pub field: FieldAccess,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOp {
    pub dst: VarId,
    pub addr: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreOp {
    pub addr: Operand,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadParamOp {
    pub op: Opcode,
    pub dst: VarId,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreParamOp {
    pub op: Opcode,
    pub index: u32,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveOp {
    pub dst: VarId,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhiOp {
    pub dst: VarId,
    /// The phi table entry holding the per-predecessor parameter slots.
    pub phi: PhiRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushOp {
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopOp {
    pub dst: VarId,
}

/// Three-operand vector primitives (`vec_fma`, `vec_clamp`, `vec_lerp`).
#[derive(Debug, Clone, PartialEq)]
pub struct PrimOp {
    pub op: Opcode,
    pub dst: VarId,
    pub args: SmallVec<[Operand; 3]>,
}

/// The instruction itself: one tagged union per concrete instruction
/// family, dispatched by discriminant everywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Basic(BasicOp),
    Ret(RetOp),
    Call(CallOp),
    Jump(JumpOp),
    Binary(BinaryOp),
    Unary(UnaryOp),
    StackAlloc(StackAllocOp),
    Offset(OffsetOp),
    Load(LoadOp),
    Store(StoreOp),
    LoadParam(LoadParamOp),
    StoreParam(StoreParamOp),
    Move(MoveOp),
    Phi(PhiOp),
    Push(PushOp),
    Pop(PopOp),
    Prim(PrimOp),
}

impl Instruction {
    pub fn nop() -> Self {
        Self::Basic(BasicOp { op: Opcode::Nop })
    }

    pub fn discard() -> Self {
        Self::Basic(BasicOp {
            op: Opcode::Discard,
        })
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Basic(op) => op.op,
            Self::Ret(_) => Opcode::Return,
            Self::Call(_) => Opcode::Call,
            Self::Jump(op) => op.op,
            Self::Binary(op) => op.op,
            Self::Unary(op) => op.op,
            Self::StackAlloc(_) => Opcode::StackAlloc,
            Self::Offset(_) => Opcode::OffsetAddress,
            Self::Load(_) => Opcode::Load,
            Self::Store(_) => Opcode::Store,
            Self::LoadParam(op) => op.op,
            Self::StoreParam(op) => op.op,
            Self::Move(_) => Opcode::Move,
            Self::Phi(_) => Opcode::Phi,
            Self::Push(_) => Opcode::Push,
            Self::Pop(_) => Opcode::Pop,
            Self::Prim(op) => op.op,
        }
    }

    pub fn is_op(&self, opcode: Opcode) -> bool {
        self.opcode() == opcode
    }

    /// The destination register, when this instruction produces one and it
    /// is bound to a valid slot.
    pub fn result(&self) -> Option<VarId> {
        let dst = match self {
            Self::Call(op) => op.dst,
            Self::Binary(op) => op.dst,
            Self::Unary(op) => op.dst,
            Self::StackAlloc(op) => op.dst,
            Self::Offset(op) => op.dst,
            Self::Load(op) => op.dst,
            Self::LoadParam(op) => op.dst,
            Self::Move(op) => op.dst,
            Self::Phi(op) => op.dst,
            Self::Pop(op) => op.dst,
            Self::Prim(op) => op.dst,
            _ => return None,
        };
        dst.is_valid().then_some(dst)
    }

    pub fn set_result(&mut self, dst: VarId) {
        match self {
            Self::Call(op) => op.dst = dst,
            Self::Binary(op) => op.dst = dst,
            Self::Unary(op) => op.dst = dst,
            Self::StackAlloc(op) => op.dst = dst,
            Self::Offset(op) => op.dst = dst,
            Self::Load(op) => op.dst = dst,
            Self::LoadParam(op) => op.dst = dst,
            Self::Move(op) => op.dst = dst,
            Self::Phi(op) => op.dst = dst,
            Self::Pop(op) => op.dst = dst,
            Self::Prim(op) => op.dst = dst,
            _ => debug_assert!(false, "instruction has no destination"),
        }
    }

    /// Visits every non-result operand in slot order.
    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match self {
            Self::Basic(_) | Self::Pop(_) | Self::StackAlloc(_) => {}
            Self::Ret(op) => {
                if let Some(value) = &op.value {
                    f(value);
                }
            }
            Self::Call(_) => {}
            Self::Jump(op) => {
                if let Some(cond) = &op.cond {
                    f(cond);
                }
            }
            Self::Binary(op) => {
                f(&op.lhs);
                f(&op.rhs);
            }
            Self::Unary(op) => f(&op.operand),
            Self::Offset(op) => f(&op.base),
            Self::Load(op) => f(&op.addr),
            Self::Store(op) => {
                f(&op.addr);
                f(&op.value);
            }
            Self::LoadParam(_) => {}
            Self::StoreParam(op) => f(&op.value),
            Self::Move(op) => f(&op.value),
            Self::Phi(_) => {}
            Self::Push(op) => f(&op.value),
            Self::Prim(op) => {
                for arg in op.args.iter() {
                    f(arg);
                }
            }
        }
    }

    /// Visits every variable *use* mutably: non-result operands that hold a
    /// [VarId]. The destination is not a use and is never visited. Phi
    /// parameters live in the phi table, not here.
    pub fn for_each_var_use_mut(&mut self, mut f: impl FnMut(&mut VarId)) {
        let mut visit = |operand: &mut Operand| {
            if let Operand::Var(v) = operand {
                f(v);
            }
        };
        match self {
            Self::Basic(_) | Self::Pop(_) | Self::StackAlloc(_) | Self::Call(_) => {}
            Self::Ret(op) => {
                if let Some(value) = &mut op.value {
                    visit(value);
                }
            }
            Self::Jump(op) => {
                if let Some(cond) = &mut op.cond {
                    visit(cond);
                }
            }
            Self::Binary(op) => {
                visit(&mut op.lhs);
                visit(&mut op.rhs);
            }
            Self::Unary(op) => visit(&mut op.operand),
            Self::Offset(op) => visit(&mut op.base),
            Self::Load(op) => visit(&mut op.addr),
            Self::Store(op) => {
                visit(&mut op.addr);
                visit(&mut op.value);
            }
            Self::LoadParam(_) => {}
            Self::StoreParam(op) => visit(&mut op.value),
            Self::Move(op) => visit(&mut op.value),
            Self::Phi(_) => {}
            Self::Push(op) => visit(&mut op.value),
            Self::Prim(op) => {
                for arg in op.args.iter_mut() {
                    visit(arg);
                }
            }
        }
    }

    /// Structural hash. Commutative instructions fold the unordered pair of
    /// operand hashes so `a + b` and `b + a` collide.
    pub fn hash_value(&self) -> u64 {
        fn operand_hash(op: &Operand) -> u64 {
            let mut h = FxHasher::default();
            op.hash(&mut h);
            h.finish()
        }

        let opcode = self.opcode();
        let mut hashes: SmallVec<[u64; 3]> = SmallVec::new();
        self.for_each_operand(|op| hashes.push(operand_hash(op)));
        if opcode.is_commutative() && hashes.len() == 2 && hashes[0] > hashes[1] {
            hashes.swap(0, 1);
        }

        let mut h = FxHasher::default();
        (opcode as u16).hash(&mut h);
        for value in hashes {
            value.hash(&mut h);
        }
        h.finish()
    }
}

/// Constant folding over immediate operands.
///
/// Returns [Number::UNKNOWN] for combinations the opcode cannot fold,
/// including shifts on non-integral operands.
pub fn fold_imm(left: Number, right: Number, opcode: Opcode) -> Number {
    match opcode {
        Opcode::Add => left + right,
        Opcode::Subtract => left - right,
        Opcode::Multiply => left * right,
        Opcode::Divide => left / right,
        Opcode::Modulus => left % right,
        Opcode::BitwiseShiftLeft => left << right,
        Opcode::BitwiseShiftRight => left >> right,
        Opcode::AndAnd => Number::from_bool(left.to_bool() && right.to_bool()),
        Opcode::OrOr => Number::from_bool(left.to_bool() || right.to_bool()),
        Opcode::BitwiseAnd => left & right,
        Opcode::BitwiseOr => left | right,
        Opcode::BitwiseXor => left ^ right,
        Opcode::LessThan => Number::from_bool(left.compare(&right) == Some(std::cmp::Ordering::Less)),
        Opcode::LessThanOrEqual => Number::from_bool(matches!(
            left.compare(&right),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        )),
        Opcode::GreaterThan => {
            Number::from_bool(left.compare(&right) == Some(std::cmp::Ordering::Greater))
        }
        Opcode::GreaterThanOrEqual => Number::from_bool(matches!(
            left.compare(&right),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        )),
        Opcode::Equal => Number::from_bool(left.eq_value(&right)),
        Opcode::NotEqual => Number::from_bool(!left.eq_value(&right)),
        Opcode::LogicalNot => Number::from_bool(!left.to_bool()),
        Opcode::BitwiseNot => !left,
        Opcode::Negate => -left,
        _ => Number::UNKNOWN,
    }
}

/// Folds an instruction whose operands are all immediates.
pub fn try_fold(instr: &Instruction) -> Option<Number> {
    let mut operands: SmallVec<[Operand; 3]> = SmallVec::new();
    instr.for_each_operand(|op| operands.push(*op));

    let left = operands.first()?.as_const()?;
    let opcode = instr.opcode();
    let folded = match operands.len() {
        1 => fold_imm(left, Number::UNKNOWN, opcode),
        2 => fold_imm(left, operands[1].as_const()?, opcode),
        _ => return None,
    };
    (!folded.is_unknown()).then_some(folded)
}

/// Block index a node is linked into, or `INVALID_BLOCK` while detached.
pub const INVALID_BLOCK: u32 = u32::MAX;

/// The intrusive node wrapping an [Instruction].
///
/// Lives in the code blob's arena; list membership (the linear stream or a
/// basic block) is the only ownership edge for its position, and unlinking
/// never frees the storage.
pub struct InstNode {
    pub link: LinkedListLink,
    pub key: Inst,
    pub block: u32,
    pub span: SourceSpan,
    pub data: Instruction,
}

impl InstNode {
    pub fn new(key: Inst, data: Instruction, span: SourceSpan) -> Self {
        Self {
            link: LinkedListLink::new(),
            key,
            block: INVALID_BLOCK,
            span,
            data,
        }
    }
}

impl fmt::Debug for InstNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {:?}", self.key, self.data)
    }
}

intrusive_adapter!(pub InstAdapter = UnsafeRef<InstNode>: InstNode { link: LinkedListLink });
