use hxsl_ir::{ControlFlowGraph, Diagnostic, DiagnosticCode, DiagnosticsSink};

use crate::domtree::DominatorTree;

/// Removes every non-entry block with an empty predecessor set, reporting
/// each as unreachable code with the span of its first mapped instruction.
///
/// Removal can orphan further blocks, so this runs to a fixpoint. Returns
/// the number of blocks removed; the dominator tree must be rebuilt
/// afterwards when any were.
pub fn remove_unreachable(cfg: &mut ControlFlowGraph, sink: &dyn DiagnosticsSink) -> usize {
    let mut removed = 0;
    loop {
        let candidate = (1..cfg.num_blocks()).find(|b| cfg.block(*b).preds().is_empty());
        let Some(block) = candidate else {
            break;
        };
        if cfg.block(block).has_insts() {
            sink.emit(Diagnostic::warning(
                DiagnosticCode::UnreachableCode,
                cfg.first_span(block),
                "unreachable code",
            ));
        }
        cfg.remove_node(block);
        removed += 1;
    }
    if removed > 0 {
        log::debug!("removed {} unreachable blocks", removed);
    }
    removed
}

/// The standard analysis entry point: unreachable elimination followed by
/// dominator-tree construction over the cleaned graph.
pub fn analyze(cfg: &mut ControlFlowGraph, sink: &dyn DiagnosticsSink) -> DominatorTree {
    remove_unreachable(cfg, sink);
    DominatorTree::compute(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxsl_ir::instruction::{Instruction, RetOp};
    use hxsl_ir::value::Operand;
    use hxsl_ir::{CapturedDiagnostics, CodeBlob, Number};

    /// S4: `int k() { return 1; return 2; }` — the second return's block
    /// has no predecessors and is reported, then removed.
    #[test]
    fn double_return_reports_unreachable() {
        let mut blob = CodeBlob::new();
        blob.push(Instruction::Ret(RetOp {
            value: Some(Operand::Const(Number::from_i32(1))),
        }));
        blob.push(Instruction::Ret(RetOp {
            value: Some(Operand::Const(Number::from_i32(2))),
        }));
        let mut cfg = ControlFlowGraph::build(blob);
        assert_eq!(cfg.num_blocks(), 2);

        let sink = CapturedDiagnostics::new();
        let tree = analyze(&mut cfg, &sink);

        assert_eq!(cfg.num_blocks(), 1);
        assert!(sink.contains(DiagnosticCode::UnreachableCode));
        assert_eq!(tree.idom[0], 0);
    }

    #[test]
    fn reachable_blocks_stay() {
        let mut blob = CodeBlob::new();
        blob.push(Instruction::Ret(RetOp { value: None }));
        let mut cfg = ControlFlowGraph::build(blob);

        let sink = CapturedDiagnostics::new();
        let removed = remove_unreachable(&mut cfg, &sink);
        assert_eq!(removed, 0);
        assert!(sink.is_empty());
    }
}
