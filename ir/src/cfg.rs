use intrusive_collections::linked_list::LinkedList;
use rustc_hash::FxHashSet;

use crate::blob::CodeBlob;
use crate::diagnostics::SourceSpan;
use crate::instruction::{InstAdapter, InstNode, Instruction, JumpOp, MoveOp, Opcode, PhiOp};
use crate::value::{Inst, Label, Operand, PhiRef, VarId};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Unknown,
    Normal,
    Conditional,
    Unconditional,
    Exit,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Normal => "Normal",
            Self::Conditional => "Conditional",
            Self::Unconditional => "Unconditional",
            Self::Exit => "Exit",
        }
    }
}

/// A basic block: a maximal straight-line run of instructions plus its
/// adjacency, addressed by block index.
pub struct BlockData {
    pub id: usize,
    pub kind: BlockKind,
    insts: LinkedList<InstAdapter>,
    preds: Vec<usize>,
    succs: Vec<usize>,
}

impl BlockData {
    fn new(id: usize, kind: BlockKind) -> Self {
        Self {
            id,
            kind,
            insts: LinkedList::new(InstAdapter::new()),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    pub fn preds(&self) -> &[usize] {
        &self.preds
    }

    pub fn succs(&self) -> &[usize] {
        &self.succs
    }

    pub fn num_preds(&self) -> usize {
        self.preds.len()
    }

    pub fn num_succs(&self) -> usize {
        self.succs.len()
    }

    pub fn has_insts(&self) -> bool {
        !self.insts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstNode> {
        self.insts.iter()
    }

    pub fn first(&self) -> Option<Inst> {
        self.insts.front().get().map(|n| n.key)
    }

    pub fn last(&self) -> Option<Inst> {
        self.insts.back().get().map(|n| n.key)
    }

    /// Position of `pred` in this block's predecessor list; phi operand
    /// slots use the same ordering.
    pub fn pred_index(&self, pred: usize) -> Option<usize> {
        self.preds.iter().position(|p| *p == pred)
    }

    fn remove_pred(&mut self, pred: usize) {
        if let Some(at) = self.preds.iter().position(|p| *p == pred) {
            self.preds.remove(at);
        }
    }

    fn remove_succ(&mut self, succ: usize) {
        if let Some(at) = self.succs.iter().position(|s| *s == succ) {
            self.succs.remove(at);
        }
    }
}

/// The control-flow graph of one function body.
///
/// Owns the [CodeBlob] so the intrusive block lists can hold nodes from
/// the blob's arena for as long as the graph is alive. The entry block is
/// always index zero.
pub struct ControlFlowGraph {
    blob: CodeBlob,
    blocks: Vec<BlockData>,
}

impl Drop for ControlFlowGraph {
    fn drop(&mut self) {
        // Block lists reference nodes owned by the blob's arena; clear
        // them without walking so drop order cannot matter.
        for block in self.blocks.iter_mut() {
            block.insts.fast_clear();
        }
    }
}

impl ControlFlowGraph {
    pub const ENTRY: usize = 0;

    /// Splits the linear instruction stream into basic blocks and links
    /// the edges.
    ///
    /// A block starts at every jump-table target and right after every
    /// terminator. Jump label operands are rewritten in place: after this
    /// returns they carry block indices, not jump-table slots.
    pub fn build(blob: CodeBlob) -> Self {
        let mut cfg = ControlFlowGraph {
            blob,
            blocks: Vec::new(),
        };

        let block_starts: FxHashSet<u32> = cfg
            .blob
            .jump_table
            .targets
            .iter()
            .copied()
            .filter(|t| *t != crate::blob::INVALID_JUMP_TARGET)
            .collect();

        // Distribute the stream over blocks, remembering which block each
        // stream position landed in so labels can be rewritten below.
        let mut pos_block: Vec<usize> = Vec::new();
        let mut current = cfg.add_node(BlockKind::Normal);
        let mut pos: u32 = 0;
        while let Some(inst) = cfg.blob.pop_front() {
            if block_starts.contains(&pos) {
                current = cfg.add_node(BlockKind::Normal);
            }
            let node = cfg.blob.node_ref(inst);
            cfg.blob.set_block(inst, current as u32);
            cfg.blocks[current].insts.push_back(node);
            pos_block.push(current);

            let opcode = cfg.blob.inst(inst).opcode();
            match opcode {
                Opcode::Jump => {
                    cfg.blocks[current].kind = BlockKind::Unconditional;
                    current = cfg.add_node(BlockKind::Normal);
                }
                Opcode::JumpZero | Opcode::JumpNotZero => {
                    cfg.blocks[current].kind = BlockKind::Conditional;
                    current = cfg.add_node(BlockKind::Normal);
                }
                Opcode::Return | Opcode::Discard => {
                    cfg.blocks[current].kind = BlockKind::Exit;
                    if !cfg.blob.is_empty() {
                        current = cfg.add_node(BlockKind::Normal);
                    }
                }
                _ => {}
            }
            pos += 1;
        }

        // Edge pass: resolve jump targets to block indices and add the
        // implicit fall-through edges.
        let n = cfg.blocks.len();
        for i in 0..n {
            let Some(last) = cfg.blocks[i].last() else {
                continue;
            };
            let opcode = cfg.blob.inst(last).opcode();
            match opcode {
                Opcode::Jump => {
                    let target = cfg.rewrite_jump_target(last, &pos_block);
                    cfg.link(i, target);
                }
                Opcode::JumpZero | Opcode::JumpNotZero => {
                    let target = cfg.rewrite_jump_target(last, &pos_block);
                    cfg.link(i, target);
                    if i + 1 < n {
                        cfg.link(i, i + 1);
                    }
                }
                _ => {
                    if i + 1 < n {
                        cfg.link(i, i + 1);
                    }
                }
            }
        }

        log::debug!("cfg built: {} blocks", cfg.blocks.len());
        cfg
    }

    fn rewrite_jump_target(&mut self, inst: Inst, pos_block: &[usize]) -> usize {
        let label = match self.blob.inst(inst) {
            Instruction::Jump(op) => op.target,
            _ => unreachable!("terminator is not a jump"),
        };
        let target_pos = self
            .blob
            .jump_table
            .get(label)
            .expect("jump references an unbound label") as usize;
        let target_block = pos_block[target_pos];
        if let Instruction::Jump(op) = self.blob.inst_mut(inst) {
            op.target = Label::from_u32(target_block as u32);
        }
        target_block
    }

    fn add_node(&mut self, kind: BlockKind) -> usize {
        // Reuse a trailing block that never received instructions or
        // edges instead of stacking empties.
        if let Some(last) = self.blocks.last_mut() {
            if last.succs.is_empty() && last.insts.is_empty() {
                last.kind = kind;
                return last.id;
            }
        }
        let id = self.blocks.len();
        self.blocks.push(BlockData::new(id, kind));
        id
    }

    #[inline(always)]
    pub fn blob(&self) -> &CodeBlob {
        &self.blob
    }

    #[inline(always)]
    pub fn blob_mut(&mut self) -> &mut CodeBlob {
        &mut self.blob
    }

    pub fn blocks(&self) -> &[BlockData] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> &BlockData {
        &self.blocks[index]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn inst(&self, inst: Inst) -> &Instruction {
        self.blob.inst(inst)
    }

    pub fn inst_mut(&mut self, inst: Inst) -> &mut Instruction {
        self.blob.inst_mut(inst)
    }

    /// Instruction keys of a block, front to back.
    pub fn block_insts(&self, block: usize) -> Vec<Inst> {
        self.blocks[block].iter().map(|n| n.key).collect()
    }

    /// The leading phi instructions of a block.
    pub fn block_phis(&self, block: usize) -> Vec<(Inst, PhiRef)> {
        let mut phis = Vec::new();
        for node in self.blocks[block].iter() {
            match &node.data {
                Instruction::Phi(op) => phis.push((node.key, op.phi)),
                _ => break,
            }
        }
        phis
    }

    /// The span of the first instruction of `block` carrying one.
    pub fn first_span(&self, block: usize) -> SourceSpan {
        self.blocks[block]
            .iter()
            .map(|n| n.span)
            .find(|s| !s.is_unknown())
            .unwrap_or(SourceSpan::UNKNOWN)
    }

    pub fn link(&mut self, from: usize, to: usize) {
        if self.blocks[from].kind == BlockKind::Exit {
            return;
        }
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    /// Disconnects `from -> to`, dropping the matching phi operand slot in
    /// `to`.
    pub fn unlink(&mut self, from: usize, to: usize) {
        let slot = self.blocks[to].pred_index(from);
        self.blocks[from].remove_succ(to);
        self.blocks[to].remove_pred(from);
        if let Some(slot) = slot {
            self.remove_phi_slot(to, slot);
        }
    }

    /// Removes operand slot `slot` from every phi of `block`. A phi left
    /// with a single operand stops merging anything and collapses to a
    /// `mov`.
    fn remove_phi_slot(&mut self, block: usize, slot: usize) {
        for (inst, phi) in self.block_phis(block) {
            let data = self.blob.metadata.phi_mut(phi);
            if slot < data.params.len() {
                data.params.remove(slot);
            }
            if data.params.len() == 1 {
                let dst = data.result;
                let src = data.params[0];
                *self.blob.inst_mut(inst) = Instruction::Move(MoveOp {
                    dst,
                    value: Operand::Var(src),
                });
            }
        }
    }

    /// Removes a block entirely: edges are detached (with phi upkeep in
    /// the successors), the last block is swapped into the hole, and any
    /// edge or jump label referencing the moved index is fixed up.
    pub fn remove_node(&mut self, index: usize) {
        let preds: Vec<usize> = self.blocks[index].preds.clone();
        for p in preds {
            if p != index {
                self.blocks[p].remove_succ(index);
            }
        }
        let succs: Vec<usize> = self.blocks[index].succs.clone();
        for s in succs {
            if s == index {
                continue;
            }
            if let Some(slot) = self.blocks[s].pred_index(index) {
                self.remove_phi_slot(s, slot);
            }
            self.blocks[s].remove_pred(index);
        }

        let last = self.blocks.len() - 1;
        if last == index {
            self.blocks.pop();
            return;
        }

        self.blocks.swap(index, last);
        self.blocks[index].id = index;

        // Self-edges of the moved block now refer to its new index.
        for p in self.blocks[index].preds.iter_mut() {
            if *p == last {
                *p = index;
            }
        }
        for s in self.blocks[index].succs.iter_mut() {
            if *s == last {
                *s = index;
            }
        }

        let moved_preds: Vec<usize> = self.blocks[index].preds.clone();
        for pred in moved_preds {
            let mut fix_labels = false;
            for s in self.blocks[pred].succs.iter_mut() {
                if *s == last {
                    *s = index;
                    fix_labels = true;
                }
            }
            if fix_labels {
                for inst in self.block_insts(pred) {
                    if let Instruction::Jump(op) = self.blob.inst_mut(inst) {
                        if op.target.as_u32() as usize == last {
                            op.target = Label::from_u32(index as u32);
                        }
                    }
                }
            }
        }

        let moved_succs: Vec<usize> = self.blocks[index].succs.clone();
        for succ in moved_succs {
            for p in self.blocks[succ].preds.iter_mut() {
                if *p == last {
                    *p = index;
                }
            }
        }

        for inst in self.block_insts(index) {
            self.blob.set_block(inst, index as u32);
        }

        self.blocks.pop();
    }

    /// Folds `from` into `to`: edges are transferred and `from`'s
    /// instructions are prepended to `to`, preserving their order.
    pub fn merge_nodes(&mut self, from: usize, to: usize) {
        let preds: Vec<usize> = self.blocks[from].preds.clone();
        for p in preds {
            self.blocks[p].remove_succ(from);
            self.link(p, to);
        }
        self.blocks[from].preds.clear();

        let succs: Vec<usize> = self.blocks[from].succs.clone();
        for s in succs {
            self.blocks[s].remove_pred(from);
            self.link(to, s);
        }
        self.blocks[from].succs.clear();

        while let Some(node) = self.blocks[from].insts.pop_back() {
            let key = node.key;
            self.blocks[to].insts.push_front(node);
            self.blob.set_block(key, to as u32);
        }

        self.remove_node(from);
    }

    /// Inserts a phi for `var` at the top of `block`, with one operand
    /// slot per current predecessor. Returns the phi table entry.
    pub fn insert_phi(&mut self, block: usize, var: VarId) -> PhiRef {
        let preds = self.blocks[block].num_preds();
        let phi = self.blob.metadata.make_phi(var, preds);
        let key = self
            .blob
            .alloc_detached(Instruction::Phi(PhiOp { dst: var, phi }), SourceSpan::UNKNOWN);
        let node = self.blob.node_ref(key);
        self.blob.set_block(key, block as u32);
        self.blocks[block].insts.push_front(node);
        phi
    }

    /// Appends an instruction at the end of `block`, allocated in the
    /// owning blob's arena.
    pub fn append_inst(&mut self, block: usize, data: Instruction) -> Inst {
        let key = self.blob.alloc_detached(data, SourceSpan::UNKNOWN);
        let node = self.blob.node_ref(key);
        self.blob.set_block(key, block as u32);
        self.blocks[block].insts.push_back(node);
        key
    }

    /// Linearizes the graph back into its blob in the given block order,
    /// rebuilding the jump table with one slot per block (slot b = stream
    /// index of block b's first instruction).
    ///
    /// A block whose fall-through successor is not the next block in
    /// `order` gets an explicit trailing `jmp` so the stream stays
    /// faithful to the edges.
    pub fn merge_into_blob(mut self, order: &[usize]) -> CodeBlob {
        let n = self.blocks.len();
        debug_assert_eq!(order.len(), n, "order must cover every block");
        debug_assert_eq!(
            order.iter().copied().collect::<FxHashSet<_>>().len(),
            n,
            "order must be a permutation"
        );

        // Which block, if any, control falls into when the stream runs off
        // the end of each block.
        let mut trailing_jumps: Vec<Option<usize>> = vec![None; n];
        for (pos, &b) in order.iter().enumerate() {
            let last_op = self.blocks[b].last().map(|i| self.blob.inst(i).opcode());
            let fallthrough = match last_op {
                Some(Opcode::Jump) | Some(Opcode::Return) | Some(Opcode::Discard) => None,
                Some(Opcode::JumpZero) | Some(Opcode::JumpNotZero) => {
                    self.blocks[b].succs.get(1).copied()
                }
                _ => self.blocks[b].succs.first().copied(),
            };
            if let Some(target) = fallthrough {
                let next = order.get(pos + 1).copied();
                if next != Some(target) {
                    trailing_jumps[b] = Some(target);
                }
            }
        }

        let mut starts = vec![0u32; n];
        for &b in order {
            starts[b] = self.blob.len();
            while let Some(node) = self.blocks[b].insts.pop_front() {
                self.blob.relink_back(node);
            }
            if let Some(target) = trailing_jumps[b] {
                self.blob.push(Instruction::Jump(JumpOp {
                    op: Opcode::Jump,
                    target: Label::from_u32(target as u32),
                    cond: None,
                }));
            }
        }

        self.blob.jump_table.targets = starts;
        std::mem::take(&mut self.blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::RetOp;
    use crate::number::Number;

    fn jump(op: Opcode, target: Label, cond: Option<Operand>) -> Instruction {
        Instruction::Jump(JumpOp { op, target, cond })
    }

    /// v0 = 1; if (v0) v0 = 2; ret v0 — one conditional, one join.
    fn diamondish_blob() -> CodeBlob {
        let mut blob = CodeBlob::new();
        let end = blob.jump_table.allocate();
        blob.push(Instruction::Move(MoveOp {
            dst: VarId::new(0),
            value: Operand::Const(Number::from_i32(1)),
        }));
        blob.push(jump(
            Opcode::JumpZero,
            end,
            Some(Operand::Var(VarId::new(0))),
        ));
        blob.push(Instruction::Move(MoveOp {
            dst: VarId::new(0),
            value: Operand::Const(Number::from_i32(2)),
        }));
        blob.jump_table.set(end, blob.len());
        blob.push(Instruction::Ret(RetOp {
            value: Some(Operand::Var(VarId::new(0))),
        }));
        blob
    }

    #[test]
    fn build_splits_at_labels_and_terminators() {
        let cfg = ControlFlowGraph::build(diamondish_blob());
        assert_eq!(cfg.num_blocks(), 3);
        assert_eq!(cfg.block(0).kind, BlockKind::Conditional);
        assert_eq!(cfg.block(1).kind, BlockKind::Normal);
        assert_eq!(cfg.block(2).kind, BlockKind::Exit);
        // Taken edge first, fall-through second.
        assert_eq!(cfg.block(0).succs(), &[2, 1]);
        assert_eq!(cfg.block(1).succs(), &[2]);
        assert_eq!(cfg.block(2).preds(), &[0, 1]);
    }

    #[test]
    fn edges_are_symmetric() {
        let cfg = ControlFlowGraph::build(diamondish_blob());
        for b in 0..cfg.num_blocks() {
            for &s in cfg.block(b).succs() {
                assert!(
                    cfg.block(s).preds().contains(&b),
                    "missing reverse edge {} -> {}",
                    b,
                    s
                );
            }
            for &p in cfg.block(b).preds() {
                assert!(
                    cfg.block(p).succs().contains(&b),
                    "missing forward edge {} -> {}",
                    p,
                    b
                );
            }
        }
    }

    #[test]
    fn jump_labels_become_block_indices() {
        let cfg = ControlFlowGraph::build(diamondish_blob());
        let cond = cfg.block(0).last().unwrap();
        match cfg.inst(cond) {
            Instruction::Jump(op) => assert_eq!(op.target.as_u32(), 2),
            other => panic!("expected a jump, got {:?}", other),
        }
    }

    #[test]
    fn remove_node_fixes_moved_labels() {
        let mut cfg = ControlFlowGraph::build(diamondish_blob());
        // Remove the middle block; the exit block (index 2) moves into
        // slot 1 and block 0's jump label must follow it.
        cfg.unlink(0, 1);
        cfg.unlink(1, 2);
        cfg.remove_node(1);
        assert_eq!(cfg.num_blocks(), 2);
        let cond = cfg.block(0).last().unwrap();
        match cfg.inst(cond) {
            Instruction::Jump(op) => assert_eq!(op.target.as_u32(), 1),
            other => panic!("expected a jump, got {:?}", other),
        }
        assert_eq!(cfg.block(0).succs(), &[1]);
        assert_eq!(cfg.block(1).preds(), &[0]);
    }

    #[test]
    fn merge_into_blob_round_trips_in_index_order() {
        let cfg = ControlFlowGraph::build(diamondish_blob());
        let order: Vec<usize> = (0..cfg.num_blocks()).collect();
        let blob = cfg.merge_into_blob(&order);
        assert_eq!(blob.len(), 4);
        assert_eq!(blob.jump_table.targets.len(), 3);
        assert_eq!(blob.jump_table.targets, vec![0, 2, 3]);
    }

    #[test]
    fn merge_nodes_prepends_and_relinks() {
        let mut cfg = ControlFlowGraph::build(diamondish_blob());
        // Fold the fall-through block into the exit block.
        let moved: Vec<Inst> = cfg.block_insts(1);
        cfg.merge_nodes(1, 2);
        assert_eq!(cfg.num_blocks(), 2);
        // The merged block starts with the moved instructions.
        let merged: Vec<Inst> = cfg.block_insts(1);
        assert_eq!(&merged[..moved.len()], &moved[..]);
        // Edges bypass the removed block: 0 -> merged on both paths.
        assert!(cfg.block(0).succs().iter().all(|s| *s == 1));
        assert!(cfg.block(1).preds().iter().all(|p| *p == 0));
    }

    #[test]
    fn singleton_phi_collapses_to_move() {
        let mut cfg = ControlFlowGraph::build(diamondish_blob());
        let phi = cfg.insert_phi(2, VarId::new(0));
        cfg.blob.metadata.phi_mut(phi).params[0] = VarId::new(0).with_version(1);
        cfg.blob.metadata.phi_mut(phi).params[1] = VarId::new(0).with_version(2);
        // Dropping the edge from block 1 leaves one incoming value.
        cfg.unlink(1, 2);
        let first = cfg.block(2).first().unwrap();
        match cfg.inst(first) {
            Instruction::Move(op) => {
                assert_eq!(op.value, Operand::Var(VarId::new(0).with_version(1)))
            }
            other => panic!("expected collapsed move, got {:?}", other),
        }
    }
}
