use rustc_hash::FxHashSet;

use hxsl_ir::ControlFlowGraph;

pub const UNDEFINED: usize = usize::MAX;

/// Immediate dominators, dominator-tree children and dominance frontiers
/// for one control-flow graph.
///
/// `idom[entry] == entry`; a block the entry cannot reach keeps
/// [UNDEFINED] and is absent from every child list.
pub struct DominatorTree {
    pub idom: Vec<usize>,
    pub children: Vec<Vec<usize>>,
    pub frontiers: Vec<FxHashSet<usize>>,
}

impl DominatorTree {
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let n = cfg.num_blocks();
        let idom = LengauerTarjan::new(cfg).compute(ControlFlowGraph::ENTRY);

        let mut children = vec![Vec::new(); n];
        for block in 0..n {
            let dom = idom[block];
            if dom != block && dom != UNDEFINED {
                children[dom].push(block);
            }
        }

        let frontiers = compute_frontiers(cfg, &idom, &children);
        DominatorTree {
            idom,
            children,
            frontiers,
        }
    }

    pub fn is_reachable(&self, block: usize) -> bool {
        self.idom.get(block).copied().unwrap_or(UNDEFINED) != UNDEFINED
    }

    /// True when every path from entry to `b` passes through `a`.
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        if a == b {
            return self.is_reachable(a);
        }
        self.strictly_dominates(a, b)
    }

    pub fn strictly_dominates(&self, a: usize, b: usize) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            let up = self.idom[current];
            if up == UNDEFINED || up == current {
                return false;
            }
            if up == a {
                return true;
            }
            current = up;
        }
    }
}

/// Iterative Lengauer–Tarjan: semi-dominators, link/eval with path
/// compression, and the two-pass finalization. All walks use explicit
/// stacks.
struct LengauerTarjan<'a> {
    cfg: &'a ControlFlowGraph,
    semi: Vec<usize>,
    idom: Vec<usize>,
    ancestor: Vec<usize>,
    label: Vec<usize>,
    parent: Vec<usize>,
    vertex: Vec<usize>,
    bucket: Vec<Vec<usize>>,
    time: usize,
}

impl<'a> LengauerTarjan<'a> {
    fn new(cfg: &'a ControlFlowGraph) -> Self {
        let n = cfg.num_blocks();
        Self {
            cfg,
            semi: vec![UNDEFINED; n],
            idom: vec![UNDEFINED; n],
            ancestor: vec![UNDEFINED; n],
            label: vec![UNDEFINED; n],
            parent: vec![UNDEFINED; n],
            vertex: vec![UNDEFINED; n],
            bucket: vec![Vec::new(); n],
            time: 0,
        }
    }

    fn dfs(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(v) = stack.pop() {
            if self.semi[v] != UNDEFINED {
                continue;
            }
            self.semi[v] = self.time;
            self.vertex[self.time] = v;
            self.label[v] = v;
            self.time += 1;

            for &w in self.cfg.block(v).succs().iter().rev() {
                if self.semi[w] == UNDEFINED {
                    self.parent[w] = v;
                    stack.push(w);
                }
            }
        }
    }

    fn link(&mut self, v: usize, w: usize) {
        self.ancestor[w] = v;
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v] == UNDEFINED {
            return self.label[v];
        }
        self.compress(v);
        self.label[v]
    }

    fn compress(&mut self, v: usize) {
        // Collect the ancestor chain, then fold it top-down.
        let mut path = Vec::new();
        let mut w = v;
        while self.ancestor[w] != UNDEFINED && self.ancestor[self.ancestor[w]] != UNDEFINED {
            path.push(w);
            w = self.ancestor[w];
        }
        for &w in path.iter().rev() {
            let a = self.ancestor[w];
            if self.semi[self.label[a]] < self.semi[self.label[w]] {
                self.label[w] = self.label[a];
            }
            self.ancestor[w] = self.ancestor[a];
        }
    }

    fn compute(mut self, start: usize) -> Vec<usize> {
        if self.cfg.num_blocks() == 0 {
            return Vec::new();
        }
        self.dfs(start);

        for i in (1..self.time).rev() {
            let w = self.vertex[i];
            let preds: Vec<usize> = self.cfg.block(w).preds().to_vec();
            for v in preds {
                // Edges from blocks the DFS never reached do not
                // constrain the semi-dominator.
                if self.semi[v] == UNDEFINED {
                    continue;
                }
                let u = self.eval(v);
                if self.semi[u] < self.semi[w] {
                    self.semi[w] = self.semi[u];
                }
            }

            self.bucket[self.vertex[self.semi[w]]].push(w);
            let p = self.parent[w];
            self.link(p, w);

            let pending = std::mem::take(&mut self.bucket[p]);
            for v in pending {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] < self.semi[v] { u } else { p };
            }
        }

        for i in 1..self.time {
            let w = self.vertex[i];
            if self.idom[w] != self.vertex[self.semi[w]] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }

        self.idom[start] = start;
        self.idom
    }
}

/// Dominance frontiers by a post-order dominator-tree walk:
/// the local rule over successors, the up rule over children's frontiers.
fn compute_frontiers(
    cfg: &ControlFlowGraph,
    idom: &[usize],
    children: &[Vec<usize>],
) -> Vec<FxHashSet<usize>> {
    let n = cfg.num_blocks();
    let mut frontiers: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); n];
    if n == 0 {
        return frontiers;
    }

    let mut stack: Vec<(usize, bool)> = vec![(ControlFlowGraph::ENTRY, false)];
    while let Some((node, closing)) = stack.pop() {
        if !closing && !children[node].is_empty() {
            stack.push((node, true));
            for &child in children[node].iter().rev() {
                stack.push((child, false));
            }
            continue;
        }

        for &succ in cfg.block(node).succs() {
            if idom[succ] != node {
                frontiers[node].insert(succ);
            }
        }
        for &child in children[node].iter() {
            let inherited: Vec<usize> = frontiers[child]
                .iter()
                .copied()
                .filter(|f| idom[*f] != node)
                .collect();
            frontiers[node].extend(inherited);
        }
    }

    frontiers
}
