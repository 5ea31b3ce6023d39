// ============================================================================
// spark-scheduler - Nodes
// Double-buffered stateful nodes stored in an arena
// ============================================================================
//
// Every logical node is a NodePair of two buffers:
//
//   active  - the committed buffer, whose state is what callers observe
//   standby - the work-in-progress buffer a flush renders into
//
// A flush copies active into standby, processes standby's queue, and on
// commit swaps the two handles. Standby buffers are created lazily, the
// first time a node is rendered or receives an update after mounting.
// ============================================================================

use std::rc::Rc;

use crate::core::constants::{EffectFlags, ScheduleMode};
use crate::core::deadline::Deadline;
use crate::core::types::{NodeId, NodeKind, NodeState, RootId};

use super::update_queue::UpdateQueue;

// =============================================================================
// NODE
// =============================================================================

/// One buffer of a logical node.
pub struct Node<S: NodeState> {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) mode: ScheduleMode,
    pub(crate) parent: Option<NodeId>,
    pub(crate) root: RootId,
    pub(crate) memoized_state: S,
    pub(crate) inputs: Rc<S::Inputs>,
    pub(crate) queue: Option<UpdateQueue<S>>,
    pub(crate) pending_deadline: Deadline,
    pub(crate) effect_flags: EffectFlags,
}

impl<S: NodeState> Node<S> {
    /// Create a detached buffer
    pub fn new(id: NodeId, kind: NodeKind, root: RootId, state: S) -> Self {
        Self {
            id,
            kind,
            mode: ScheduleMode::SYNC,
            parent: None,
            root,
            memoized_state: state,
            inputs: Rc::new(S::Inputs::default()),
            queue: None,
            pending_deadline: Deadline::NO_WORK,
            effect_flags: EffectFlags::NONE,
        }
    }

    /// The logical node this buffer belongs to
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node kind
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Scheduling mode
    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Parent node, `None` for the root node
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Owning root
    pub fn root(&self) -> RootId {
        self.root
    }

    /// Last computed state of this buffer
    pub fn state(&self) -> &S {
        &self.memoized_state
    }

    /// Inputs passed to payload functions
    pub fn inputs(&self) -> &S::Inputs {
        &self.inputs
    }

    /// The update queue, if one has been created
    pub fn queue(&self) -> Option<&UpdateQueue<S>> {
        self.queue.as_ref()
    }

    /// Most urgent deadline still pending on this buffer
    pub fn pending_deadline(&self) -> Deadline {
        self.pending_deadline
    }

    /// Effect flags collected by the last processing pass
    pub fn effect_flags(&self) -> EffectFlags {
        self.effect_flags
    }

    /// Copy everything but the queue and effects into a fresh buffer.
    fn shell(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            mode: self.mode,
            parent: self.parent,
            root: self.root,
            memoized_state: self.memoized_state.clone(),
            inputs: Rc::clone(&self.inputs),
            queue: None,
            pending_deadline: self.pending_deadline,
            effect_flags: EffectFlags::NONE,
        }
    }
}

// =============================================================================
// NODE PAIR
// =============================================================================

/// Index of a buffer slot in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

/// The two buffers of a logical node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePair {
    /// Committed buffer
    pub active: BufferHandle,
    /// Work-in-progress buffer, created on demand
    pub standby: Option<BufferHandle>,
}

// =============================================================================
// ARENA
// =============================================================================

/// Owner of every node buffer.
///
/// Handles are never reused; removed nodes leave empty slots behind.
pub struct NodeArena<S: NodeState> {
    buffers: Vec<Option<Node<S>>>,
    pairs: Vec<Option<NodePair>>,
}

impl<S: NodeState> NodeArena<S> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
            pairs: Vec::new(),
        }
    }

    /// Reserve the next node id.
    pub fn next_id(&self) -> NodeId {
        NodeId::from_index(self.pairs.len())
    }

    /// Insert a node built for [`NodeArena::next_id`].
    pub fn insert(&mut self, node: Node<S>) -> NodeId {
        let id = self.next_id();
        debug_assert_eq!(node.id, id, "node built for a different slot");
        let active = self.push_buffer(node);
        self.pairs.push(Some(NodePair {
            active,
            standby: None,
        }));
        id
    }

    fn push_buffer(&mut self, node: Node<S>) -> BufferHandle {
        let handle = BufferHandle(self.buffers.len());
        self.buffers.push(Some(node));
        handle
    }

    /// Whether `id` refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.pair(id).is_some()
    }

    /// Buffer handles of a live node
    pub fn pair(&self, id: NodeId) -> Option<NodePair> {
        self.pairs.get(id.index()).copied().flatten()
    }

    fn buffer(&self, handle: BufferHandle) -> Option<&Node<S>> {
        self.buffers.get(handle.0).and_then(Option::as_ref)
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Option<&mut Node<S>> {
        self.buffers.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Committed buffer of a node
    pub fn active(&self, id: NodeId) -> Option<&Node<S>> {
        self.pair(id).and_then(|pair| self.buffer(pair.active))
    }

    /// Committed buffer of a node, mutably
    pub fn active_mut(&mut self, id: NodeId) -> Option<&mut Node<S>> {
        let pair = self.pair(id)?;
        self.buffer_mut(pair.active)
    }

    /// Work-in-progress buffer of a node, if it has been created
    pub fn standby(&self, id: NodeId) -> Option<&Node<S>> {
        self.pair(id)
            .and_then(|pair| pair.standby)
            .and_then(|handle| self.buffer(handle))
    }

    /// Work-in-progress buffer of a node, mutably
    pub fn standby_mut(&mut self, id: NodeId) -> Option<&mut Node<S>> {
        let handle = self.pair(id)?.standby?;
        self.buffer_mut(handle)
    }

    /// Both buffers of a node at once.
    pub fn buffers_mut(&mut self, id: NodeId) -> Option<(&mut Node<S>, Option<&mut Node<S>>)> {
        let pair = self.pair(id)?;
        match pair.standby {
            None => self.buffer_mut(pair.active).map(|active| (active, None)),
            Some(standby) => {
                let (a, b) = (pair.active.0, standby.0);
                debug_assert_ne!(a, b, "node pair aliases one buffer");
                let (low, high) = self.buffers.split_at_mut(a.max(b));
                let (first, second) = (low[a.min(b)].as_mut()?, high[0].as_mut()?);
                if a < b {
                    Some((first, Some(second)))
                } else {
                    Some((second, Some(first)))
                }
            }
        }
    }

    /// Create the standby buffer if the node does not have one yet.
    pub fn ensure_standby(&mut self, id: NodeId) -> Option<BufferHandle> {
        let pair = self.pair(id)?;
        if let Some(standby) = pair.standby {
            return Some(standby);
        }
        let shell = self.buffer(pair.active)?.shell();
        let handle = self.push_buffer(shell);
        self.pairs[id.index()] = Some(NodePair {
            active: pair.active,
            standby: Some(handle),
        });
        Some(handle)
    }

    /// Reset the standby buffer from the committed one so a render can start
    /// from a consistent snapshot.
    ///
    /// The standby queue is always a fresh clone of the active queue; a queue
    /// is never shared between the two buffers, which is what keeps a render
    /// from mutating the committed queue. Captured updates waiting on the old
    /// standby queue are carried over.
    pub fn prepare_work_in_progress(&mut self, id: NodeId) -> Option<&mut Node<S>> {
        self.ensure_standby(id)?;
        let (active, standby) = self.buffers_mut(id)?;
        let standby = standby?;

        let captured = standby.queue.as_mut().map(UpdateQueue::take_captured);
        let mut queue = active.queue.as_ref().map(UpdateQueue::clone_for_work_in_progress);
        if let Some(captured) = captured {
            if !captured.is_empty() {
                let queue = queue.get_or_insert_with(|| UpdateQueue::new(active.memoized_state.clone()));
                queue.restore_captured(captured);
            }
        }

        standby.memoized_state = active.memoized_state.clone();
        standby.inputs = Rc::clone(&active.inputs);
        standby.mode = active.mode;
        standby.pending_deadline = active.pending_deadline;
        standby.effect_flags &= EffectFlags::SHOULD_CAPTURE;
        standby.queue = queue;
        Some(standby)
    }

    /// Promote the standby buffer to active.
    pub fn swap(&mut self, id: NodeId) -> bool {
        match self.pair(id) {
            Some(NodePair {
                active,
                standby: Some(standby),
            }) => {
                self.pairs[id.index()] = Some(NodePair {
                    active: standby,
                    standby: Some(active),
                });
                true
            }
            _ => false,
        }
    }

    /// Drop both buffers of a node.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(pair) = self.pairs.get_mut(id.index()).and_then(Option::take) else {
            return false;
        };
        self.buffers[pair.active.0] = None;
        if let Some(standby) = pair.standby {
            self.buffers[standby.0] = None;
        }
        true
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.pairs.iter().filter(|pair| pair.is_some()).count()
    }

    /// Whether the arena holds no live nodes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk parent links from `id` up to the topmost node.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_, S> {
        Ancestors {
            arena: self,
            next: self.contains(id).then_some(id),
        }
    }
}

impl<S: NodeState> Default for NodeArena<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a node and its ancestors, innermost first.
pub struct Ancestors<'a, S: NodeState> {
    arena: &'a NodeArena<S>,
    next: Option<NodeId>,
}

impl<S: NodeState> Iterator for Ancestors<'_, S> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.arena.active(current).and_then(Node::parent);
        Some(current)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type State = BTreeMap<&'static str, i32>;

    fn arena_with_root() -> (NodeArena<State>, NodeId) {
        let mut arena = NodeArena::new();
        let id = arena.next_id();
        let node = Node::new(id, NodeKind::Root, RootId::from_index(0), State::new());
        arena.insert(node);
        (arena, id)
    }

    #[test]
    fn standby_is_created_lazily() {
        let (mut arena, id) = arena_with_root();
        assert!(arena.standby(id).is_none());

        let first = arena.ensure_standby(id);
        let second = arena.ensure_standby(id);
        assert!(first.is_some());
        assert_eq!(first, second);
        assert!(arena.standby(id).is_some());
    }

    #[test]
    fn swap_exchanges_buffers() {
        let (mut arena, id) = arena_with_root();
        arena.ensure_standby(id);
        if let Some(node) = arena.standby_mut(id) {
            node.memoized_state.insert("x", 1);
        }

        assert!(arena.swap(id));
        assert_eq!(arena.active(id).and_then(|n| n.state().get("x")), Some(&1));
        assert_eq!(arena.standby(id).and_then(|n| n.state().get("x")), None);
    }

    #[test]
    fn swap_without_standby_is_noop() {
        let (mut arena, id) = arena_with_root();
        assert!(!arena.swap(id));
    }

    #[test]
    fn buffers_mut_returns_distinct_buffers() {
        let (mut arena, id) = arena_with_root();
        arena.ensure_standby(id);

        let (active, standby) = arena.buffers_mut(id).expect("live node");
        active.memoized_state.insert("a", 1);
        standby.expect("standby").memoized_state.insert("b", 2);

        assert_eq!(arena.active(id).map(|n| n.state().len()), Some(1));
        assert_eq!(arena.standby(id).map(|n| n.state().len()), Some(1));

        // also after a swap, where the active slot has the higher index
        arena.swap(id);
        let (active, _) = arena.buffers_mut(id).expect("live node");
        assert!(active.state().contains_key("b"));
    }

    #[test]
    fn ancestors_walk_parent_links() {
        let (mut arena, root) = arena_with_root();
        let child_id = arena.next_id();
        let mut child = Node::new(child_id, NodeKind::Stateful, RootId::from_index(0), State::new());
        child.parent = Some(root);
        arena.insert(child);

        let grandchild_id = arena.next_id();
        let mut grandchild = Node::new(grandchild_id, NodeKind::Leaf, RootId::from_index(0), State::new());
        grandchild.parent = Some(child_id);
        arena.insert(grandchild);

        let path: Vec<_> = arena.ancestors(grandchild_id).collect();
        assert_eq!(path, vec![grandchild_id, child_id, root]);
    }

    #[test]
    fn remove_frees_both_buffers() {
        let (mut arena, id) = arena_with_root();
        arena.ensure_standby(id);
        assert_eq!(arena.len(), 1);

        assert!(arena.remove(id));
        assert!(!arena.contains(id));
        assert!(arena.is_empty());
        assert!(!arena.remove(id));
    }

    #[test]
    fn prepare_copies_committed_state() {
        let (mut arena, id) = arena_with_root();
        if let Some(node) = arena.active_mut(id) {
            node.memoized_state.insert("n", 7);
            node.pending_deadline = Deadline::SYNC;
        }

        let wip = arena.prepare_work_in_progress(id).expect("standby");
        assert_eq!(wip.state().get("n"), Some(&7));
        assert_eq!(wip.pending_deadline(), Deadline::SYNC);
    }
}
