use hxsl_ir::{CodeBlob, ControlFlowGraph};
use hxsl_ir_analysis::{traverse, DomTreeVisitor, DominatorTree};

/// Merges a control-flow graph back into a linear code blob.
///
/// Blocks are laid out in reverse post-order of the dominator tree (entry
/// first); the merge inserts an explicit `jmp` wherever a fall-through
/// successor is not the next block in the layout, and rebuilds the jump
/// table with one slot per block.
pub fn linearize(mut cfg: ControlFlowGraph, domtree: &DominatorTree) -> CodeBlob {
    #[derive(Default)]
    struct Collect {
        postorder: Vec<usize>,
    }

    impl DomTreeVisitor for Collect {
        type Ctx = ();

        fn visit(&mut self, _cfg: &mut ControlFlowGraph, _block: usize, _ctx: &mut ()) {}

        fn close(&mut self, _cfg: &mut ControlFlowGraph, block: usize, _ctx: &mut ()) {
            self.postorder.push(block);
        }
    }

    let mut collect = Collect::default();
    traverse(&mut collect, &mut cfg, domtree, ControlFlowGraph::ENTRY);

    let mut order = collect.postorder;
    order.reverse();

    // Blocks absent from the dominator tree (nothing reachable points at
    // them) still need a slot in the layout.
    let mut placed = vec![false; cfg.num_blocks()];
    for &block in order.iter() {
        placed[block] = true;
    }
    for (block, seen) in placed.iter().enumerate() {
        if !seen {
            order.push(block);
        }
    }

    cfg.merge_into_blob(&order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxsl_ir::instruction::{Instruction, JumpOp, MoveOp, Opcode, RetOp};
    use hxsl_ir::value::{Operand, VarId};
    use hxsl_ir::{CodeBlob, NullSink, Number};
    use hxsl_ir_analysis::analyze;

    #[test]
    fn linearized_stream_keeps_block_starts() {
        let mut blob = CodeBlob::new();
        let end = blob.jump_table.allocate();
        blob.push(Instruction::Move(MoveOp {
            dst: VarId::new(0),
            value: Operand::Const(Number::from_i32(1)),
        }));
        blob.push(Instruction::Jump(JumpOp {
            op: Opcode::JumpZero,
            target: end,
            cond: Some(Operand::Var(VarId::new(0))),
        }));
        blob.push(Instruction::Move(MoveOp {
            dst: VarId::new(0),
            value: Operand::Const(Number::from_i32(2)),
        }));
        blob.jump_table.set(end, blob.len());
        blob.push(Instruction::Ret(RetOp {
            value: Some(Operand::Var(VarId::new(0))),
        }));

        let mut cfg = ControlFlowGraph::build(blob);
        let tree = analyze(&mut cfg, &NullSink);
        let blocks = cfg.num_blocks();
        let merged = linearize(cfg, &tree);

        // One jump-table slot per block, each pointing into the stream.
        assert_eq!(merged.jump_table.len(), blocks);
        for target in merged.jump_table.targets.iter() {
            assert!(*target <= merged.len());
        }
        // The dominator-tree layout moves the exit block ahead of the
        // then-arm, so both broken fall-throughs gain explicit jumps.
        assert_eq!(merged.len(), 6);
        assert_eq!(merged.jump_table.targets, vec![0, 4, 3]);
    }
}
