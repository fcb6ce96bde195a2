//! Block-local common-subexpression elimination.
//!
//! Runs over SSA form, where every operand has a unique reaching
//! definition, so availability of a pure computation within one block is
//! a purely syntactic question. Candidates are bucketed by the
//! instruction hash (commutative operations hash their operand pair
//! unordered) and confirmed structurally; a recomputation collapses into
//! a `mov` from the first definition.

use rustc_hash::FxHashMap;

use hxsl_ir::instruction::{BinaryOp, Instruction, MoveOp};
use hxsl_ir::{ControlFlowGraph, Inst, Operand, VarId};

/// Replaces repeated pure binary computations inside each block with
/// moves from their first occurrence. Returns how many instructions were
/// replaced.
pub fn eliminate_common_subexpressions(cfg: &mut ControlFlowGraph) -> usize {
    let mut replaced = 0;
    for block in 0..cfg.num_blocks() {
        let mut available: FxHashMap<u64, Vec<Inst>> = FxHashMap::default();
        for inst in cfg.block_insts(block) {
            let current = match cfg.inst(inst) {
                Instruction::Binary(op) => op.clone(),
                _ => continue,
            };
            let hash = cfg.inst(inst).hash_value();
            let candidates = available.entry(hash).or_default();
            let prior: Option<VarId> = candidates.iter().find_map(|c| match cfg.inst(*c) {
                Instruction::Binary(other) if same_computation(&current, other) => Some(other.dst),
                _ => None,
            });
            match prior {
                Some(value) => {
                    *cfg.inst_mut(inst) = Instruction::Move(MoveOp {
                        dst: current.dst,
                        value: Operand::Var(value),
                    });
                    replaced += 1;
                }
                None => candidates.push(inst),
            }
        }
    }
    if replaced > 0 {
        log::debug!("cse replaced {} instructions", replaced);
    }
    replaced
}

fn same_computation(a: &BinaryOp, b: &BinaryOp) -> bool {
    if a.op != b.op {
        return false;
    }
    (a.lhs == b.lhs && a.rhs == b.rhs)
        || (a.op.is_commutative() && a.lhs == b.rhs && a.rhs == b.lhs)
}
