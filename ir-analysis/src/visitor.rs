use hxsl_ir::ControlFlowGraph;

use crate::domtree::DominatorTree;

/// A dominator-tree walk with open/close hooks.
///
/// Traversal is an explicit stack: each block is visited, its subtree
/// runs, then the block is closed with the same context value. SSA
/// renaming and re-linearization both ride on this.
pub trait DomTreeVisitor {
    type Ctx: Default;

    fn visit(&mut self, cfg: &mut ControlFlowGraph, block: usize, ctx: &mut Self::Ctx);

    fn close(&mut self, _cfg: &mut ControlFlowGraph, _block: usize, _ctx: &mut Self::Ctx) {}
}

pub fn traverse<V: DomTreeVisitor>(
    visitor: &mut V,
    cfg: &mut ControlFlowGraph,
    domtree: &DominatorTree,
    entry: usize,
) {
    if cfg.num_blocks() == 0 {
        return;
    }

    enum Step<C> {
        Open(usize),
        Close(usize, C),
    }

    let mut stack: Vec<Step<V::Ctx>> = vec![Step::Open(entry)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Open(block) => {
                let mut ctx = V::Ctx::default();
                visitor.visit(cfg, block, &mut ctx);
                stack.push(Step::Close(block, ctx));
                for &child in domtree.children[block].iter().rev() {
                    stack.push(Step::Open(child));
                }
            }
            Step::Close(block, mut ctx) => {
                visitor.close(cfg, block, &mut ctx);
            }
        }
    }
}
