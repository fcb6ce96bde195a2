//! The instruction-level codec: little-endian primitives, the per-function
//! metadata tables, and the packed instruction encoding.
//!
//! An instruction is `{opcode: u16, opKinds: packed 4-bit kinds, operand
//! payloads}`. Every opcode has a fixed slot layout; unused slots carry the
//! `Disabled` kind and no payload. Immediates carry their number-kind
//! discriminator byte.

use std::io::{Read, Write};

use smallvec::SmallVec;

use crate::blob::{CodeBlob, INVALID_JUMP_TARGET};
use crate::errors::{ReadError, WriteError};
use crate::instruction::{
    BasicOp, BinaryOp, CallOp, Instruction, JumpOp, LoadOp, LoadParamOp, MoveOp, Opcode, OffsetOp,
    OpShape, PhiOp, PopOp, PrimOp, PushOp, RetOp, StackAllocOp, StoreOp, StoreParamOp, UnaryOp,
};
use crate::metadata::{
    FuncEntry, FuncTarget, Metadata, PhiData, TypeEntry, TypeShape, Variable, VariableFlags,
};
use crate::module::{FunctionId, PrimitiveClass, PrimitiveKind};
use crate::number::{Number, NumberType};
use crate::value::{FieldAccess, FuncRef, Label, Operand, PhiRef, TypeRef, VarId};

pub(crate) const KIND_DISABLED: u8 = 0;
pub(crate) const KIND_VARIABLE: u8 = 1;
pub(crate) const KIND_IMM: u8 = 2;
pub(crate) const KIND_LABEL: u8 = 3;
pub(crate) const KIND_TYPE: u8 = 4;
pub(crate) const KIND_FUNCTION: u8 = 5;
pub(crate) const KIND_FIELD: u8 = 6;

pub(crate) fn write_u8<W: Write>(w: &mut W, value: u8) -> Result<(), WriteError> {
    w.write_all(&[value])?;
    Ok(())
}

pub(crate) fn write_u16<W: Write>(w: &mut W, value: u16) -> Result<(), WriteError> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u32<W: Write>(w: &mut W, value: u32) -> Result<(), WriteError> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u64<W: Write>(w: &mut W, value: u64) -> Result<(), WriteError> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_string<W: Write>(w: &mut W, value: &str) -> Result<(), WriteError> {
    write_u32(w, value.len() as u32)?;
    w.write_all(value.as_bytes())?;
    Ok(())
}

pub(crate) fn read_u8<R: Read>(r: &mut R) -> Result<u8, ReadError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(r: &mut R) -> Result<u16, ReadError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32, ReadError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> Result<u64, ReadError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_string<R: Read>(r: &mut R) -> Result<String, ReadError> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| ReadError::InvalidModule("string is not valid utf-8"))
}

/// One wire operand slot.
#[derive(Debug, Copy, Clone)]
enum Slot {
    None,
    Var(VarId),
    Imm(Number),
    Label(Label),
    Type(TypeRef),
    Func(FuncRef),
    Field(FieldAccess),
}

impl Slot {
    fn kind(&self) -> u8 {
        match self {
            Self::None => KIND_DISABLED,
            Self::Var(_) => KIND_VARIABLE,
            Self::Imm(_) => KIND_IMM,
            Self::Label(_) => KIND_LABEL,
            Self::Type(_) => KIND_TYPE,
            Self::Func(_) => KIND_FUNCTION,
            Self::Field(_) => KIND_FIELD,
        }
    }
}

fn operand_slot(operand: &Operand) -> Slot {
    match operand {
        Operand::Const(n) => Slot::Imm(*n),
        Operand::Var(v) => Slot::Var(*v),
        Operand::Label(l) => Slot::Label(*l),
        Operand::Type(t) => Slot::Type(*t),
        Operand::Func(f) => Slot::Func(*f),
        Operand::Field(fa) => Slot::Field(*fa),
        // Phi references ride as u32 immediates; the decoder knows the
        // opcode context.
        Operand::Phi(p) => Slot::Imm(Number::from_u32(p.as_u32())),
    }
}

fn dst_slot(dst: VarId) -> Slot {
    if dst.is_valid() {
        Slot::Var(dst)
    } else {
        Slot::None
    }
}

fn instruction_slots(instr: &Instruction) -> SmallVec<[Slot; 4]> {
    let mut slots: SmallVec<[Slot; 4]> = SmallVec::new();
    match instr {
        Instruction::Basic(_) => {}
        Instruction::Ret(op) => {
            slots.push(op.value.as_ref().map(operand_slot).unwrap_or(Slot::None));
        }
        Instruction::Call(op) => {
            slots.push(dst_slot(op.dst));
            slots.push(Slot::Func(op.callee));
        }
        Instruction::Jump(op) => {
            slots.push(Slot::Label(op.target));
            slots.push(op.cond.as_ref().map(operand_slot).unwrap_or(Slot::None));
        }
        Instruction::Binary(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(operand_slot(&op.lhs));
            slots.push(operand_slot(&op.rhs));
        }
        Instruction::Unary(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(operand_slot(&op.operand));
        }
        Instruction::StackAlloc(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(Slot::Type(op.ty));
        }
        Instruction::Offset(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(operand_slot(&op.base));
            slots.push(Slot::Field(op.field));
        }
        Instruction::Load(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(operand_slot(&op.addr));
        }
        Instruction::Store(op) => {
            slots.push(operand_slot(&op.addr));
            slots.push(operand_slot(&op.value));
        }
        Instruction::LoadParam(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(Slot::Imm(Number::from_u32(op.index)));
        }
        Instruction::StoreParam(op) => {
            slots.push(Slot::Imm(Number::from_u32(op.index)));
            slots.push(operand_slot(&op.value));
        }
        Instruction::Move(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(operand_slot(&op.value));
        }
        Instruction::Phi(op) => {
            slots.push(Slot::Var(op.dst));
            slots.push(Slot::Imm(Number::from_u32(op.phi.as_u32())));
        }
        Instruction::Push(op) => {
            slots.push(operand_slot(&op.value));
        }
        Instruction::Pop(op) => {
            slots.push(Slot::Var(op.dst));
        }
        Instruction::Prim(op) => {
            slots.push(Slot::Var(op.dst));
            for arg in op.args.iter() {
                slots.push(operand_slot(arg));
            }
            while slots.len() < 4 {
                slots.push(Slot::None);
            }
        }
    }
    debug_assert_eq!(slots.len(), instr.opcode().slot_count());
    slots
}

pub(crate) fn write_instruction<W: Write>(
    w: &mut W,
    instr: &Instruction,
) -> Result<(), WriteError> {
    let opcode = instr.opcode();
    write_u16(w, opcode as u16)?;

    let slots = instruction_slots(instr);
    let mut packed = 0u8;
    for (i, slot) in slots.iter().enumerate() {
        if i % 2 == 0 {
            packed = slot.kind();
        } else {
            packed |= slot.kind() << 4;
            write_u8(w, packed)?;
        }
    }
    if slots.len() % 2 == 1 {
        write_u8(w, packed)?;
    }

    for slot in slots.iter() {
        match slot {
            Slot::None => {}
            Slot::Var(v) => write_u64(w, v.raw())?,
            Slot::Imm(n) => {
                write_u8(w, n.kind() as u8)?;
                write_u64(w, n.raw_bits())?;
            }
            Slot::Label(l) => write_u64(w, l.as_u32() as u64)?,
            Slot::Type(t) => write_u32(w, t.as_u32())?,
            Slot::Func(func) => write_u32(w, func.as_u32())?,
            Slot::Field(fa) => {
                write_u32(w, fa.ty.as_u32())?;
                write_u32(w, fa.field)?;
            }
        }
    }
    Ok(())
}

fn read_slot<R: Read>(r: &mut R, kind: u8) -> Result<Slot, ReadError> {
    match kind {
        KIND_DISABLED => Ok(Slot::None),
        KIND_VARIABLE => Ok(Slot::Var(VarId::from_raw(read_u64(r)?))),
        KIND_IMM => {
            let raw_kind = read_u8(r)?;
            let number_kind =
                NumberType::from_u8(raw_kind).ok_or(ReadError::UnknownNumberType(raw_kind))?;
            let bits = read_u64(r)?;
            Ok(Slot::Imm(Number::from_raw(number_kind, bits)))
        }
        KIND_LABEL => Ok(Slot::Label(Label::from_u32(read_u64(r)? as u32))),
        KIND_TYPE => Ok(Slot::Type(TypeRef::from_u32(read_u32(r)?))),
        KIND_FUNCTION => Ok(Slot::Func(FuncRef::from_u32(read_u32(r)?))),
        KIND_FIELD => {
            let ty = TypeRef::from_u32(read_u32(r)?);
            let field = read_u32(r)?;
            Ok(Slot::Field(FieldAccess::new(ty, field)))
        }
        other => Err(ReadError::UnknownOperandKind(other)),
    }
}

fn slot_operand(slot: Slot) -> Result<Operand, ReadError> {
    match slot {
        Slot::Var(v) => Ok(Operand::Var(v)),
        Slot::Imm(n) => Ok(Operand::Const(n)),
        Slot::Label(l) => Ok(Operand::Label(l)),
        Slot::Type(t) => Ok(Operand::Type(t)),
        Slot::Func(f) => Ok(Operand::Func(f)),
        Slot::Field(fa) => Ok(Operand::Field(fa)),
        Slot::None => Err(ReadError::InvalidModule("missing required operand")),
    }
}

fn slot_var(slot: Slot) -> Result<VarId, ReadError> {
    match slot {
        Slot::Var(v) => Ok(v),
        _ => Err(ReadError::InvalidModule("expected a variable operand")),
    }
}

fn slot_imm_u32(slot: Slot) -> Result<u32, ReadError> {
    match slot {
        Slot::Imm(n) => Ok(n.as_u32()),
        _ => Err(ReadError::InvalidModule("expected an immediate operand")),
    }
}

pub(crate) fn read_instruction<R: Read>(r: &mut R) -> Result<Instruction, ReadError> {
    let raw = read_u16(r)?;
    let opcode = Opcode::from_u16(raw).ok_or(ReadError::UnknownOpcode(raw))?;

    let count = opcode.slot_count();
    let mut kinds: SmallVec<[u8; 4]> = SmallVec::new();
    let mut byte = 0u8;
    for i in 0..count {
        if i % 2 == 0 {
            byte = read_u8(r)?;
            kinds.push(byte & 0x0F);
        } else {
            kinds.push(byte >> 4);
        }
    }
    let mut slots: SmallVec<[Slot; 4]> = SmallVec::new();
    for kind in kinds {
        slots.push(read_slot(r, kind)?);
    }

    let instr = match opcode.shape() {
        OpShape::Basic => Instruction::Basic(BasicOp { op: opcode }),
        OpShape::Ret => Instruction::Ret(RetOp {
            value: match slots[0] {
                Slot::None => None,
                other => Some(slot_operand(other)?),
            },
        }),
        OpShape::Call => Instruction::Call(CallOp {
            dst: match slots[0] {
                Slot::None => VarId::INVALID,
                other => slot_var(other)?,
            },
            callee: match slots[1] {
                Slot::Func(f) => f,
                _ => return Err(ReadError::InvalidModule("call without a function operand")),
            },
        }),
        OpShape::Jump => Instruction::Jump(JumpOp {
            op: opcode,
            target: match slots[0] {
                Slot::Label(l) => l,
                _ => return Err(ReadError::InvalidModule("jump without a label operand")),
            },
            cond: match slots[1] {
                Slot::None => None,
                other => Some(slot_operand(other)?),
            },
        }),
        OpShape::Binary => Instruction::Binary(BinaryOp {
            op: opcode,
            dst: slot_var(slots[0])?,
            lhs: slot_operand(slots[1])?,
            rhs: slot_operand(slots[2])?,
        }),
        OpShape::Unary => Instruction::Unary(UnaryOp {
            op: opcode,
            dst: slot_var(slots[0])?,
            operand: slot_operand(slots[1])?,
        }),
        OpShape::StackAlloc => Instruction::StackAlloc(StackAllocOp {
            dst: slot_var(slots[0])?,
            ty: match slots[1] {
                Slot::Type(t) => t,
                _ => return Err(ReadError::InvalidModule("alloca without a type operand")),
            },
        }),
        OpShape::Offset => Instruction::Offset(OffsetOp {
            dst: slot_var(slots[0])?,
            base: slot_operand(slots[1])?,
            field: match slots[2] {
                Slot::Field(fa) => fa,
                _ => return Err(ReadError::InvalidModule("offs without a field operand")),
            },
        }),
        OpShape::Load => Instruction::Load(LoadOp {
            dst: slot_var(slots[0])?,
            addr: slot_operand(slots[1])?,
        }),
        OpShape::Store => Instruction::Store(StoreOp {
            addr: slot_operand(slots[0])?,
            value: slot_operand(slots[1])?,
        }),
        OpShape::LoadParam => Instruction::LoadParam(LoadParamOp {
            op: opcode,
            dst: slot_var(slots[0])?,
            index: slot_imm_u32(slots[1])?,
        }),
        OpShape::StoreParam => Instruction::StoreParam(StoreParamOp {
            op: opcode,
            index: slot_imm_u32(slots[0])?,
            value: slot_operand(slots[1])?,
        }),
        OpShape::Move => Instruction::Move(MoveOp {
            dst: slot_var(slots[0])?,
            value: slot_operand(slots[1])?,
        }),
        OpShape::Phi => Instruction::Phi(PhiOp {
            dst: slot_var(slots[0])?,
            phi: PhiRef::from_u32(slot_imm_u32(slots[1])?),
        }),
        OpShape::Push => Instruction::Push(PushOp {
            value: slot_operand(slots[0])?,
        }),
        OpShape::Pop => Instruction::Pop(PopOp {
            dst: slot_var(slots[0])?,
        }),
        OpShape::Prim => {
            let mut args = SmallVec::new();
            for slot in slots.iter().skip(1) {
                match slot {
                    Slot::None => {}
                    other => args.push(slot_operand(*other)?),
                }
            }
            Instruction::Prim(PrimOp {
                op: opcode,
                dst: slot_var(slots[0])?,
                args,
            })
        }
    };
    Ok(instr)
}

/// Serializes the metadata tables. Call targets are written as record ids
/// resolved through `resolve`.
pub(crate) fn write_metadata<W: Write>(
    w: &mut W,
    meta: &Metadata,
    resolve: &dyn Fn(FunctionId) -> u64,
) -> Result<(), WriteError> {
    write_u32(w, meta.types.len() as u32)?;
    for entry in meta.types.iter() {
        write_string(w, &entry.name)?;
        write_u8(w, entry.shape.kind as u8)?;
        write_u8(w, entry.shape.class as u8)?;
        write_u32(w, entry.shape.rows)?;
        write_u32(w, entry.shape.columns)?;
    }

    for table in [&meta.variables, &meta.temps] {
        write_u32(w, table.len() as u32)?;
        for var in table.iter() {
            write_u64(w, var.id.raw())?;
            write_u32(w, var.ty.as_u32())?;
            write_u8(w, var.flags.bits())?;
        }
    }

    write_u32(w, meta.functions.len() as u32)?;
    for entry in meta.functions.iter() {
        let record = match entry.target {
            FuncTarget::Layout(fid) => resolve(fid),
            FuncTarget::Record(id) => id,
        };
        write_u64(w, record)?;
    }

    write_u32(w, meta.phis.len() as u32)?;
    for phi in meta.phis.iter() {
        write_u64(w, phi.result.raw())?;
        write_u32(w, phi.params.len() as u32)?;
        for param in phi.params.iter() {
            write_u64(w, param.raw())?;
        }
    }
    Ok(())
}

pub(crate) fn read_metadata<R: Read>(r: &mut R) -> Result<Metadata, ReadError> {
    let mut meta = Metadata::new();

    let type_count = read_u32(r)?;
    for _ in 0..type_count {
        let name = read_string(r)?;
        let raw_kind = read_u8(r)?;
        let kind =
            PrimitiveKind::from_u8(raw_kind).ok_or(ReadError::InvalidModule("bad type kind"))?;
        let raw_class = read_u8(r)?;
        let class =
            PrimitiveClass::from_u8(raw_class).ok_or(ReadError::InvalidModule("bad type class"))?;
        let rows = read_u32(r)?;
        let columns = read_u32(r)?;
        meta.types.push(TypeEntry {
            name,
            shape: TypeShape {
                kind,
                class,
                rows,
                columns,
            },
            layout: None,
        });
    }

    for temp_table in [false, true] {
        let count = read_u32(r)?;
        for _ in 0..count {
            let id = VarId::from_raw(read_u64(r)?);
            let ty = TypeRef::from_u32(read_u32(r)?);
            let flags = VariableFlags::from_bits_truncate(read_u8(r)?);
            let var = Variable { id, ty, flags };
            if temp_table {
                meta.temps.push(var);
            } else {
                meta.variables.push(var);
            }
        }
    }

    let func_count = read_u32(r)?;
    for _ in 0..func_count {
        let record = read_u64(r)?;
        meta.functions.push(FuncEntry {
            target: FuncTarget::Record(record),
        });
    }

    let phi_count = read_u32(r)?;
    for _ in 0..phi_count {
        let result = VarId::from_raw(read_u64(r)?);
        let param_count = read_u32(r)?;
        let mut params = SmallVec::new();
        for _ in 0..param_count {
            params.push(VarId::from_raw(read_u64(r)?));
        }
        meta.phis.push(PhiData { result, params });
    }

    Ok(meta)
}

/// Serializes a code blob: metadata, instruction stream, jump table.
pub(crate) fn write_blob<W: Write>(
    w: &mut W,
    blob: &CodeBlob,
    resolve: &dyn Fn(FunctionId) -> u64,
) -> Result<(), WriteError> {
    write_metadata(w, &blob.metadata, resolve)?;

    write_u32(w, blob.len())?;
    for node in blob.iter() {
        write_instruction(w, &node.data)?;
    }

    write_u32(w, blob.jump_table.len() as u32)?;
    for target in blob.jump_table.targets.iter() {
        debug_assert_ne!(*target, INVALID_JUMP_TARGET, "unbound label at write time");
        write_u32(w, *target)?;
    }
    Ok(())
}

pub(crate) fn read_blob<R: Read>(r: &mut R) -> Result<CodeBlob, ReadError> {
    let mut blob = CodeBlob::new();
    blob.metadata = read_metadata(r)?;

    let instr_count = read_u32(r)?;
    for _ in 0..instr_count {
        let instr = read_instruction(r)?;
        blob.push(instr);
    }

    let label_count = read_u32(r)?;
    for _ in 0..label_count {
        let target = read_u32(r)?;
        if target > blob.len() {
            return Err(ReadError::InvalidModule("label points outside the stream"));
        }
        blob.jump_table.allocate_at(target);
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(instr: Instruction) -> Instruction {
        let mut bytes = Vec::new();
        write_instruction(&mut bytes, &instr).unwrap();
        read_instruction(&mut bytes.as_slice()).unwrap()
    }

    #[test]
    fn instruction_roundtrip() {
        let cases = vec![
            Instruction::nop(),
            Instruction::Ret(RetOp { value: None }),
            Instruction::Ret(RetOp {
                value: Some(Operand::Const(Number::from_f32(1.5))),
            }),
            Instruction::Binary(BinaryOp {
                op: Opcode::Add,
                dst: VarId::temp(2),
                lhs: Operand::Var(VarId::new(0)),
                rhs: Operand::Const(Number::from_i32(1)),
            }),
            Instruction::Jump(JumpOp {
                op: Opcode::JumpZero,
                target: Label::from_u32(3),
                cond: Some(Operand::Var(VarId::new(1))),
            }),
            Instruction::Call(CallOp {
                dst: VarId::INVALID,
                callee: FuncRef::from_u32(7),
            }),
            Instruction::Offset(OffsetOp {
                dst: VarId::temp(1),
                base: Operand::Var(VarId::new(4)),
                field: FieldAccess::new(TypeRef::from_u32(2), 5),
            }),
            Instruction::Phi(PhiOp {
                dst: VarId::new(3).with_version(2),
                phi: PhiRef::from_u32(1),
            }),
        ];
        for case in cases {
            assert_eq!(roundtrip(case.clone()), case);
        }
    }

    #[test]
    fn truncated_instruction_is_end_of_stream() {
        let mut bytes = Vec::new();
        write_instruction(
            &mut bytes,
            &Instruction::Binary(BinaryOp {
                op: Opcode::Multiply,
                dst: VarId::new(0),
                lhs: Operand::Var(VarId::new(1)),
                rhs: Operand::Var(VarId::new(2)),
            }),
        )
        .unwrap();
        bytes.truncate(bytes.len() - 3);
        match read_instruction(&mut bytes.as_slice()) {
            Err(ReadError::EndOfStream) => {}
            other => panic!("expected EndOfStream, got {:?}", other),
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let bytes = 0xFFFFu16.to_le_bytes();
        match read_instruction(&mut bytes.as_slice()) {
            Err(ReadError::UnknownOpcode(0xFFFF)) => {}
            other => panic!("expected UnknownOpcode, got {:?}", other),
        }
    }
}
