use std::fmt;

use intrusive_collections::linked_list::LinkedList;
use intrusive_collections::UnsafeRef;
use smallvec::SmallVec;

use crate::arena::ArenaMap;
use crate::diagnostics::SourceSpan;
use crate::instruction::{InstAdapter, InstNode, Instruction};
use crate::metadata::Metadata;
use crate::value::{Inst, Label};

pub const INVALID_JUMP_TARGET: u32 = u32::MAX;

/// Dense array mapping symbolic labels to positions.
///
/// While a function is being built, a slot holds the index of the targeted
/// instruction in the linear stream. After control-flow-graph construction
/// rewrites jump operands to block indices the table goes stale, and
/// re-linearization rebuilds it with one slot per block, pointing at the
/// block's first instruction.
#[derive(Debug, Clone, Default)]
pub struct JumpTable {
    pub targets: Vec<u32>,
}

impl JumpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a label with no bound position yet.
    pub fn allocate(&mut self) -> Label {
        self.allocate_at(INVALID_JUMP_TARGET)
    }

    pub fn allocate_at(&mut self, target: u32) -> Label {
        let label = Label::from_u32(self.targets.len() as u32);
        self.targets.push(target);
        label
    }

    pub fn set(&mut self, label: Label, target: u32) {
        self.targets[label.as_u32() as usize] = target;
    }

    pub fn get(&self, label: Label) -> Option<u32> {
        self.targets
            .get(label.as_u32() as usize)
            .copied()
            .filter(|t| *t != INVALID_JUMP_TARGET)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn resize(&mut self, len: usize) {
        self.targets.clear();
        self.targets.resize(len, INVALID_JUMP_TARGET);
    }
}

/// The serializable IR body of one function: metadata registries, the
/// instruction stream, and the jump table.
///
/// The blob owns the arena every instruction node lives in; intrusive list
/// membership (here, or in a basic block once a CFG is built) only decides
/// position. Unlinking a node never frees it.
pub struct CodeBlob {
    pub metadata: Metadata,
    insts: ArenaMap<Inst, InstNode>,
    body: LinkedList<InstAdapter>,
    pub jump_table: JumpTable,
    linked: u32,
}

impl Default for CodeBlob {
    fn default() -> Self {
        Self {
            metadata: Metadata::new(),
            insts: ArenaMap::new(),
            body: LinkedList::new(InstAdapter::new()),
            jump_table: JumpTable::new(),
            linked: 0,
        }
    }
}

impl Drop for CodeBlob {
    fn drop(&mut self) {
        // The arena inside `insts` frees node storage; the list must not
        // walk those nodes afterwards.
        self.body.fast_clear();
    }
}

impl fmt::Debug for CodeBlob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CodeBlob")
            .field("instructions", &self.linked)
            .field("labels", &self.jump_table.len())
            .finish()
    }
}

impl CodeBlob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions currently linked into the stream.
    pub fn len(&self) -> u32 {
        self.linked
    }

    pub fn is_empty(&self) -> bool {
        self.linked == 0
    }

    /// Appends an instruction to the end of the stream.
    pub fn push(&mut self, data: Instruction) -> Inst {
        self.push_spanned(data, SourceSpan::UNKNOWN)
    }

    pub fn push_spanned(&mut self, data: Instruction, span: SourceSpan) -> Inst {
        let key = self.insts.alloc_key();
        let node = self.insts.append(key, InstNode::new(key, data, span));
        self.body
            .push_back(unsafe { UnsafeRef::from_raw(node.as_ptr()) });
        self.linked += 1;
        key
    }

    pub fn inst(&self, inst: Inst) -> &Instruction {
        &self.insts[inst].data
    }

    pub fn inst_mut(&mut self, inst: Inst) -> &mut Instruction {
        &mut self.insts[inst].data
    }

    pub fn node(&self, inst: Inst) -> &InstNode {
        &self.insts[inst]
    }

    pub fn set_span(&mut self, inst: Inst, span: SourceSpan) {
        self.insts[inst].span = span;
    }

    pub(crate) fn set_block(&mut self, inst: Inst, block: u32) {
        self.insts[inst].block = block;
    }

    /// The last instruction of the stream, if any.
    pub fn last_inst(&self) -> Option<Inst> {
        self.body.back().get().map(|node| node.key)
    }

    /// Detaches and returns the first instruction of the stream. The node
    /// stays alive in the arena; only its list membership changes.
    pub fn pop_front(&mut self) -> Option<Inst> {
        let node = self.body.pop_front()?;
        self.linked -= 1;
        Some(node.key)
    }

    /// Iterates the linked stream front to back.
    pub fn iter(&self) -> impl Iterator<Item = &InstNode> {
        self.body.iter()
    }

    /// Annotates the `count` most recently appended instructions with a
    /// source span.
    pub fn annotate_tail(&mut self, count: u32, span: SourceSpan) {
        let mut keys: SmallVec<[Inst; 8]> = SmallVec::new();
        let mut cursor = self.body.back();
        for _ in 0..count {
            match cursor.get() {
                Some(node) => keys.push(node.key),
                None => break,
            }
            cursor.move_prev();
        }
        for key in keys {
            self.insts[key].span = span;
        }
    }

    /// Deep-copies `inst` into this blob's arena and appends the copy to
    /// the stream. Block and span annotations are copied by value.
    pub fn clone_inst(&mut self, inst: Inst) -> Inst {
        let data = self.insts[inst].data.clone();
        let span = self.insts[inst].span;
        let block = self.insts[inst].block;
        let key = self.push_spanned(data, span);
        self.insts[key].block = block;
        key
    }

    /// Deep-copies an instruction from another blob into this arena.
    pub fn clone_inst_from(&mut self, other: &CodeBlob, inst: Inst) -> Inst {
        let node = other.node(inst);
        let key = self.push_spanned(node.data.clone(), node.span);
        self.insts[key].block = node.block;
        key
    }

    /// Allocates a node in the arena without linking it anywhere. The
    /// caller decides list membership (e.g. a basic block list).
    pub(crate) fn alloc_detached(&mut self, data: Instruction, span: SourceSpan) -> Inst {
        let key = self.insts.alloc_key();
        self.insts.append(key, InstNode::new(key, data, span));
        key
    }

    pub(crate) fn node_ref(&self, inst: Inst) -> UnsafeRef<InstNode> {
        let raw = unsafe { self.insts.get_raw(inst) }.expect("detached instruction");
        unsafe { UnsafeRef::from_raw(raw.as_ptr()) }
    }

    /// Re-links a node (previously detached with [pop_front](Self::pop_front)
    /// or held by a basic block) at the end of the stream.
    pub(crate) fn relink_back(&mut self, node: UnsafeRef<InstNode>) {
        self.body.push_back(node);
        self.linked += 1;
    }

    /// True if some label still points past the end of the stream, which
    /// means the target instruction has not been appended yet.
    pub fn has_dangling_label(&self) -> bool {
        self.jump_table
            .targets
            .iter()
            .any(|t| *t == INVALID_JUMP_TARGET || *t >= self.linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    #[test]
    fn push_and_iterate_in_order() {
        let mut blob = CodeBlob::new();
        let a = blob.push(Instruction::nop());
        let b = blob.push(Instruction::discard());
        assert_eq!(blob.len(), 2);
        let order: Vec<Inst> = blob.iter().map(|n| n.key).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn pop_front_detaches_but_keeps_storage() {
        let mut blob = CodeBlob::new();
        let a = blob.push(Instruction::nop());
        let popped = blob.pop_front().unwrap();
        assert_eq!(popped, a);
        assert_eq!(blob.len(), 0);
        // The node's data is still reachable through its key.
        assert!(blob.inst(a).is_op(crate::instruction::Opcode::Nop));
    }

    #[test]
    fn labels_bind_to_indices() {
        let mut table = JumpTable::new();
        let l = table.allocate();
        assert_eq!(table.get(l), None);
        table.set(l, 3);
        assert_eq!(table.get(l), Some(3));
    }
}
