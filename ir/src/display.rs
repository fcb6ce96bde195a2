use std::cell::Cell;
use std::fmt;

use crate::blob::CodeBlob;
use crate::cfg::ControlFlowGraph;
use crate::instruction::Instruction;
use crate::metadata::Metadata;
use crate::value::Operand;

/// Render an iterator of `T`, comma-separated.
pub struct DisplayValues<T>(Cell<Option<T>>);

impl<T> DisplayValues<T> {
    pub fn new(inner: T) -> Self {
        Self(Cell::new(Some(inner)))
    }
}

impl<T, I> fmt::Display for DisplayValues<I>
where
    T: fmt::Display,
    I: Iterator<Item = T>,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let iter = self.0.take().expect("display iterator already consumed");
        for (i, item) in iter.enumerate() {
            if i == 0 {
                write!(f, "{}", item)?;
            } else {
                write!(f, ", {}", item)?;
            }
        }
        Ok(())
    }
}

fn write_operand(f: &mut fmt::Formatter, operand: &Operand, meta: &Metadata) -> fmt::Result {
    match operand {
        Operand::Const(n) => write!(f, "{}", n),
        Operand::Var(v) => write!(f, "{}", v),
        Operand::Label(l) => write!(f, "loc_{}", l.as_u32()),
        Operand::Type(t) => write!(f, "%{}", meta.type_name(*t)),
        Operand::Func(func) => write!(f, "f{}", func.as_u32()),
        Operand::Field(fa) => write!(f, "%{}::{}", meta.type_name(fa.ty), fa.field),
        Operand::Phi(p) => write!(f, "phi{}", p.as_u32()),
    }
}

struct DisplayInst<'a> {
    instr: &'a Instruction,
    meta: &'a Metadata,
}

impl fmt::Display for DisplayInst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let meta = self.meta;
        let instr = self.instr;
        if let Some(dst) = instr.result() {
            write!(f, "{} = ", dst)?;
        }
        write!(f, "{}", instr.opcode().mnemonic())?;
        match instr {
            Instruction::Phi(op) => {
                let data = meta.phi(op.phi);
                write!(
                    f,
                    " [{}]",
                    DisplayValues::new(data.params.iter().copied())
                )?;
            }
            Instruction::StackAlloc(op) => {
                write!(f, " %{}", meta.type_name(op.ty))?;
            }
            Instruction::Offset(op) => {
                write!(f, " ")?;
                write_operand(f, &op.base, meta)?;
                write!(f, ", %{}::{}", meta.type_name(op.field.ty), op.field.field)?;
            }
            Instruction::Call(op) => {
                write!(f, " f{}", op.callee.as_u32())?;
            }
            Instruction::Jump(op) => {
                write!(f, " loc_{}", op.target.as_u32())?;
                if let Some(cond) = &op.cond {
                    write!(f, ", ")?;
                    write_operand(f, cond, meta)?;
                }
            }
            Instruction::LoadParam(op) => {
                write!(f, " {}", op.index)?;
            }
            Instruction::StoreParam(op) => {
                write!(f, " ")?;
                write_operand(f, &op.value, meta)?;
                write!(f, ", {}", op.index)?;
            }
            other => {
                let mut first = true;
                let mut result = Ok(());
                other.for_each_operand(|operand| {
                    if result.is_err() {
                        return;
                    }
                    result = (|| {
                        if first {
                            write!(f, " ")?;
                            first = false;
                        } else {
                            write!(f, ", ")?;
                        }
                        write_operand(f, operand, meta)
                    })();
                });
                result?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for CodeBlob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{{")?;
        for (index, node) in self.iter().enumerate() {
            for (slot, target) in self.jump_table.targets.iter().enumerate() {
                if *target as usize == index {
                    writeln!(f, "loc_{}:", slot)?;
                }
            }
            writeln!(
                f,
                "    {}",
                DisplayInst {
                    instr: &node.data,
                    meta: &self.metadata
                }
            )?;
        }
        let len = self.len() as usize;
        for (slot, target) in self.jump_table.targets.iter().enumerate() {
            if *target as usize == len {
                writeln!(f, "loc_{}:", slot)?;
            }
        }
        write!(f, "}}")
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for block in self.blocks() {
            writeln!(f, "block{} [{}]", block.id, block.kind.as_str())?;
            for node in block.iter() {
                writeln!(
                    f,
                    "    {}",
                    DisplayInst {
                        instr: &node.data,
                        meta: &self.blob().metadata
                    }
                )?;
            }
            writeln!(
                f,
                "    preds: [{}]  succs: [{}]",
                DisplayValues::new(block.preds().iter()),
                DisplayValues::new(block.succs().iter())
            )?;
        }
        Ok(())
    }
}
