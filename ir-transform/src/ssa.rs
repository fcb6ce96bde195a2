//! SSA construction, two passes after Cytron et al.: phi placement at
//! dominance frontiers driven by a def-site worklist, then a renaming walk
//! over the dominator tree with per-variable version stacks.

use rustc_hash::{FxHashMap, FxHashSet};

use hxsl_ir::instruction::Instruction;
use hxsl_ir::{ControlFlowGraph, VarId};
use hxsl_ir_analysis::{traverse, DomTreeVisitor, DominatorTree};

/// Rewrites `cfg` into SSA form.
///
/// Afterwards every assignment targets a unique `(variable, version)` pair
/// with `version >= 1`, and each phi's k-th parameter carries the value of
/// its variable on entry from the k-th predecessor.
pub fn construct_ssa(cfg: &mut ControlFlowGraph, domtree: &DominatorTree) {
    place_phis(cfg, domtree);
    let mut renamer = Renamer::default();
    traverse(&mut renamer, cfg, domtree, ControlFlowGraph::ENTRY);
}

fn place_phis(cfg: &mut ControlFlowGraph, domtree: &DominatorTree) {
    // Definition sites per (version-stripped) variable.
    let mut def_sites: FxHashMap<VarId, FxHashSet<usize>> = FxHashMap::default();
    for block in 0..cfg.num_blocks() {
        for inst in cfg.block_insts(block) {
            if let Some(dst) = cfg.inst(inst).result() {
                def_sites.entry(dst.base()).or_default().insert(block);
            }
        }
    }

    // Stable processing order keeps the phi table deterministic.
    let mut vars: Vec<(VarId, FxHashSet<usize>)> = def_sites.into_iter().collect();
    vars.sort_by_key(|(var, _)| var.raw());

    let mut placed_count = 0usize;
    for (var, sites) in vars {
        let mut placed: FxHashSet<usize> = FxHashSet::default();
        let mut worklist: Vec<usize> = sites.iter().copied().collect();
        worklist.sort_unstable();

        while let Some(block) = worklist.pop() {
            let mut frontier: Vec<usize> =
                domtree.frontiers[block].iter().copied().collect();
            frontier.sort_unstable();
            for df in frontier {
                if placed.insert(df) {
                    cfg.insert_phi(df, var);
                    placed_count += 1;
                    if !sites.contains(&df) {
                        worklist.push(df);
                    }
                }
            }
        }
    }
    log::debug!("placed {} phis", placed_count);
}

/// The renaming pass. The visitor context records which stacks the block
/// pushed, so closing the block pops exactly those.
#[derive(Default)]
struct Renamer {
    stacks: FxHashMap<VarId, Vec<VarId>>,
    counters: FxHashMap<VarId, u32>,
}

impl Renamer {
    /// The reaching definition for `base`, or the unversioned variable
    /// when no definition dominates this point.
    fn top(&self, base: VarId) -> VarId {
        self.stacks
            .get(&base)
            .and_then(|stack| stack.last().copied())
            .unwrap_or(base)
    }

    fn fresh(&mut self, base: VarId) -> VarId {
        let counter = self.counters.entry(base).or_insert(0);
        *counter += 1;
        let version = base.with_version(*counter);
        self.stacks.entry(base).or_default().push(version);
        version
    }

    fn pop(&mut self, base: VarId) {
        if let Some(stack) = self.stacks.get_mut(&base) {
            stack.pop();
        }
    }
}

impl DomTreeVisitor for Renamer {
    type Ctx = Vec<VarId>;

    fn visit(&mut self, cfg: &mut ControlFlowGraph, block: usize, ctx: &mut Self::Ctx) {
        for inst in cfg.block_insts(block) {
            if let Instruction::Phi(op) = cfg.inst(inst) {
                let phi = op.phi;
                let base = op.dst.base();
                let fresh = self.fresh(base);
                ctx.push(base);
                cfg.inst_mut(inst).set_result(fresh);
                cfg.blob_mut().metadata.phi_mut(phi).result = fresh;
                continue;
            }

            // Uses first: they see the reaching definition from before
            // this instruction.
            {
                let stacks = &self.stacks;
                cfg.inst_mut(inst).for_each_var_use_mut(|var| {
                    let base = var.base();
                    *var = stacks
                        .get(&base)
                        .and_then(|stack| stack.last().copied())
                        .unwrap_or(base);
                });
            }

            if let Some(dst) = cfg.inst(inst).result() {
                let base = dst.base();
                let fresh = self.fresh(base);
                ctx.push(base);
                cfg.inst_mut(inst).set_result(fresh);
            }
        }

        // Feed the phis of every successor through our predecessor slot.
        let succs: Vec<usize> = cfg.block(block).succs().to_vec();
        for succ in succs {
            let Some(slot) = cfg.block(succ).pred_index(block) else {
                continue;
            };
            for (_, phi) in cfg.block_phis(succ) {
                let base = cfg.blob().metadata.phi(phi).result.base();
                let top = self.top(base);
                cfg.blob_mut().metadata.phi_mut(phi).params[slot] = top;
            }
        }
    }

    fn close(&mut self, _cfg: &mut ControlFlowGraph, _block: usize, ctx: &mut Self::Ctx) {
        for base in ctx.drain(..) {
            self.pop(base);
        }
    }
}
