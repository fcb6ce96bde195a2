//! A stack-machine interpreter that executes IR blobs directly.
//!
//! Each call owns a frame of parameter, register and temporary slots sized
//! from the blob's metadata. Dispatch is one match over the opcode, and
//! branches move an instruction cursor through the jump table over the
//! linear stream. Execution is single-threaded and runs to completion; a
//! malformed blob with an unbounded loop must be fenced by the caller.

use thiserror::Error;

use hxsl_ir::instruction::{InstNode, Instruction};
use hxsl_ir::metadata::FuncTarget;
use hxsl_ir::{CodeBlob, Label, Module, Number, Opcode, Operand, VarId};

/// Runtime failures. The frame stack unwinds to the caller on every one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("cast overflow")]
    CastOverflow,
    #[error("opcode {0:?} is not executable")]
    UnimplementedOpcode(Opcode),
    #[error("parameter index {0} is out of range")]
    BadParamIndex(u32),
    #[error("jump to an unbound label")]
    BadJumpTarget,
    #[error("call target is not linked to the module")]
    UnresolvedCall,
    #[error("called function has no body")]
    MissingBody,
    #[error("value stack underflow")]
    StackUnderflow,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct ExecOptions {
    /// Trap on a cast whose integral target cannot represent the value,
    /// instead of wrapping.
    pub trap_on_cast_overflow: bool,
}

struct Frame {
    params: Vec<Number>,
    registers: Vec<Number>,
    temps: Vec<Number>,
    stack: Vec<Number>,
    /// Arguments buffered by `starg` for the next call.
    pending: Vec<Number>,
}

impl Frame {
    fn new(blob: &CodeBlob, params: Vec<Number>) -> Self {
        Self {
            params,
            registers: vec![Number::default(); blob.metadata.variables.len()],
            temps: vec![Number::default(); blob.metadata.temps.len()],
            stack: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn read(&self, var: VarId) -> Number {
        let index = var.index() as usize;
        let pool = if var.is_temp() {
            &self.temps
        } else {
            &self.registers
        };
        pool.get(index).copied().unwrap_or_default()
    }

    fn write(&mut self, var: VarId, value: Number) {
        if !var.is_valid() {
            return;
        }
        let index = var.index() as usize;
        let pool = if var.is_temp() {
            &mut self.temps
        } else {
            &mut self.registers
        };
        if let Some(slot) = pool.get_mut(index) {
            *slot = value;
        }
    }

    fn value(&self, operand: &Operand) -> Number {
        match operand {
            Operand::Const(n) => *n,
            Operand::Var(v) => self.read(*v),
            _ => Number::default(),
        }
    }
}

/// Executes code blobs against the module that owns their call targets.
pub struct Interpreter<'m> {
    module: &'m Module,
    options: ExecOptions,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            options: ExecOptions::default(),
        }
    }

    pub fn with_options(module: &'m Module, options: ExecOptions) -> Self {
        Self { module, options }
    }

    /// Runs `blob` with the given parameters and returns its result. A
    /// body that runs off the end or discards yields the default number.
    pub fn execute(&self, blob: &CodeBlob, params: &[Number]) -> Result<Number, EvalError> {
        log::trace!(
            "executing blob: {} instructions, {} params",
            blob.len(),
            params.len()
        );
        self.run(blob, params.to_vec())
    }

    fn run(&self, blob: &CodeBlob, params: Vec<Number>) -> Result<Number, EvalError> {
        let mut frame = Frame::new(blob, params);
        let insts: Vec<&InstNode> = blob.iter().collect();

        let mut pc = 0usize;
        while pc < insts.len() {
            let instr = &insts[pc].data;
            pc += 1;
            match instr {
                Instruction::Basic(op) => match op.op {
                    Opcode::Nop => {}
                    Opcode::Discard => return Ok(Number::default()),
                    other => return Err(EvalError::UnimplementedOpcode(other)),
                },
                Instruction::Ret(op) => {
                    return Ok(op
                        .value
                        .as_ref()
                        .map(|v| frame.value(v))
                        .unwrap_or_default());
                }
                Instruction::Move(op) => {
                    let value = frame.value(&op.value);
                    frame.write(op.dst, value);
                }
                Instruction::Binary(op) => {
                    let lhs = frame.value(&op.lhs);
                    let rhs = frame.value(&op.rhs);
                    let result = binary_op(op.op, lhs, rhs)?;
                    frame.write(op.dst, result);
                }
                Instruction::Unary(op) => {
                    let result = match op.op {
                        // Default-initialisation: zero of the variable's
                        // declared scalar kind.
                        Opcode::Zero => self.cast(blob, op.dst, Number::from_i32(0))?,
                        Opcode::Increment => {
                            frame.value(&op.operand) + Number::from_i32(1)
                        }
                        Opcode::Decrement => {
                            frame.value(&op.operand) - Number::from_i32(1)
                        }
                        Opcode::LogicalNot => {
                            Number::from_bool(!frame.value(&op.operand).to_bool())
                        }
                        Opcode::BitwiseNot => !frame.value(&op.operand),
                        Opcode::Negate => -frame.value(&op.operand),
                        Opcode::Cast => {
                            self.cast(blob, op.dst, frame.value(&op.operand))?
                        }
                        Opcode::AddressOf => frame.value(&op.operand),
                        other => return Err(EvalError::UnimplementedOpcode(other)),
                    };
                    frame.write(op.dst, result);
                }
                Instruction::StackAlloc(op) => {
                    frame.write(op.dst, Number::default());
                }
                Instruction::Load(op) => {
                    let value = frame.value(&op.addr);
                    frame.write(op.dst, value);
                }
                Instruction::Store(op) => {
                    let value = frame.value(&op.value);
                    if let Operand::Var(dst) = op.addr {
                        frame.write(dst, value);
                    }
                }
                Instruction::LoadParam(op) => {
                    let value = frame
                        .params
                        .get(op.index as usize)
                        .copied()
                        .ok_or(EvalError::BadParamIndex(op.index))?;
                    frame.write(op.dst, value);
                }
                Instruction::StoreParam(op) => {
                    let value = frame.value(&op.value);
                    let index = op.index as usize;
                    if frame.pending.len() <= index {
                        frame.pending.resize(index + 1, Number::default());
                    }
                    frame.pending[index] = value;
                }
                Instruction::Call(op) => {
                    let entry = blob
                        .metadata
                        .func(op.callee)
                        .ok_or(EvalError::UnresolvedCall)?;
                    let FuncTarget::Layout(callee) = entry.target else {
                        return Err(EvalError::UnresolvedCall);
                    };
                    let callee_blob = &self.module.functions[callee].blob;
                    if callee_blob.is_empty() {
                        return Err(EvalError::MissingBody);
                    }
                    let args = std::mem::take(&mut frame.pending);
                    let result = self.run(callee_blob, args)?;
                    if op.dst.is_valid() {
                        frame.write(op.dst, result);
                    }
                }
                Instruction::Jump(op) => {
                    let take = match op.op {
                        Opcode::Jump => true,
                        Opcode::JumpZero => op
                            .cond
                            .as_ref()
                            .map(|c| frame.value(c).is_zero())
                            .unwrap_or(false),
                        Opcode::JumpNotZero => op
                            .cond
                            .as_ref()
                            .map(|c| !frame.value(c).is_zero())
                            .unwrap_or(false),
                        other => return Err(EvalError::UnimplementedOpcode(other)),
                    };
                    if take {
                        pc = self.jump_target(blob, op.target, insts.len())?;
                    }
                }
                Instruction::Push(op) => {
                    let value = frame.value(&op.value);
                    frame.stack.push(value);
                }
                Instruction::Pop(op) => {
                    let value = frame.stack.pop().ok_or(EvalError::StackUnderflow)?;
                    frame.write(op.dst, value);
                }
                Instruction::Offset(_) => {
                    return Err(EvalError::UnimplementedOpcode(Opcode::OffsetAddress));
                }
                Instruction::Phi(_) => {
                    return Err(EvalError::UnimplementedOpcode(Opcode::Phi));
                }
                Instruction::Prim(op) => {
                    return Err(EvalError::UnimplementedOpcode(op.op));
                }
            }
        }
        Ok(Number::default())
    }

    fn jump_target(
        &self,
        blob: &CodeBlob,
        label: Label,
        len: usize,
    ) -> Result<usize, EvalError> {
        let target = blob.jump_table.get(label).ok_or(EvalError::BadJumpTarget)? as usize;
        if target > len {
            return Err(EvalError::BadJumpTarget);
        }
        Ok(target)
    }

    fn cast(&self, blob: &CodeBlob, dst: VarId, value: Number) -> Result<Number, EvalError> {
        let Some(target) = blob.metadata.var_number_type(dst) else {
            return Ok(value);
        };
        if self.options.trap_on_cast_overflow {
            value.checked_cast(target).ok_or(EvalError::CastOverflow)
        } else {
            Ok(value.cast(target))
        }
    }
}

fn binary_op(opcode: Opcode, lhs: Number, rhs: Number) -> Result<Number, EvalError> {
    use std::cmp::Ordering;
    let result = match opcode {
        Opcode::Add => lhs + rhs,
        Opcode::Subtract => lhs - rhs,
        Opcode::Multiply => lhs * rhs,
        Opcode::Divide | Opcode::Modulus => {
            let wide = lhs.kind().max(rhs.kind());
            if wide.is_integer() && rhs.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            if opcode == Opcode::Divide {
                lhs / rhs
            } else {
                lhs % rhs
            }
        }
        Opcode::BitwiseShiftLeft => lhs << rhs,
        Opcode::BitwiseShiftRight => lhs >> rhs,
        Opcode::AndAnd => Number::from_bool(lhs.to_bool() && rhs.to_bool()),
        Opcode::OrOr => Number::from_bool(lhs.to_bool() || rhs.to_bool()),
        Opcode::BitwiseAnd => lhs & rhs,
        Opcode::BitwiseOr => lhs | rhs,
        Opcode::BitwiseXor => lhs ^ rhs,
        Opcode::LessThan => Number::from_bool(lhs.compare(&rhs) == Some(Ordering::Less)),
        Opcode::LessThanOrEqual => Number::from_bool(matches!(
            lhs.compare(&rhs),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )),
        Opcode::GreaterThan => Number::from_bool(lhs.compare(&rhs) == Some(Ordering::Greater)),
        Opcode::GreaterThanOrEqual => Number::from_bool(matches!(
            lhs.compare(&rhs),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        )),
        Opcode::Equal => Number::from_bool(lhs.eq_value(&rhs)),
        Opcode::NotEqual => Number::from_bool(!lhs.eq_value(&rhs)),
        other => return Err(EvalError::UnimplementedOpcode(other)),
    };
    Ok(result)
}
