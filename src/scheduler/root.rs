// ============================================================================
// spark-scheduler - Roots
// Mounting trees, submitting updates and reading committed state
// ============================================================================

use std::rc::Rc;

use tracing::{debug, trace};

use crate::core::constants::{EffectFlags, ScheduleMode};
use crate::core::deadline::Deadline;
use crate::core::error::{Result, SchedulerError};
use crate::core::types::{BatchId, NodeId, NodeKind, NodeState, RootId};
use crate::fiber::node::Node;
use crate::fiber::update_queue::{
    enqueue_captured_update, enqueue_update, Patch, Replacement, Update, UpdateAction,
    UpdateCallback, UpdateRef,
};
use crate::primitives::work::WorkHandle;

use super::engine::Scheduler;
use super::host::{FinishedWork, Host};
use super::registry::{add_root_to_schedule, remove_root_from_schedule, scheduled_roots};

// =============================================================================
// ROOT TABLE
// =============================================================================

/// Bookkeeping for one mounted tree.
pub(crate) struct RootSlot<S: NodeState> {
    /// The root node
    pub(crate) node: NodeId,
    /// Every node of the tree, parents before children
    pub(crate) members: Vec<NodeId>,
    /// Deadline the registry orders this root by
    pub(crate) deadline: Deadline,
    /// Linked into the registry
    pub(crate) scheduled: bool,
    /// Next root in the registry
    pub(crate) next_scheduled: Option<RootId>,
    /// Head of the batch list
    pub(crate) first_batch: Option<BatchId>,
    /// Rendered work held back by a deferred batch
    pub(crate) finished_work: Option<FinishedWork<S>>,
}

impl<S: NodeState> RootSlot<S> {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            members: vec![node],
            deadline: Deadline::NO_WORK,
            scheduled: false,
            next_scheduled: None,
            first_batch: None,
            finished_work: None,
        }
    }
}

/// Arena of mounted roots. Handles are never reused.
pub(crate) struct RootTable<S: NodeState> {
    slots: Vec<Option<RootSlot<S>>>,
}

impl<S: NodeState> RootTable<S> {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub(crate) fn next_id(&self) -> RootId {
        RootId::from_index(self.slots.len())
    }

    pub(crate) fn insert(&mut self, node: NodeId) -> RootId {
        let id = self.next_id();
        self.slots.push(Some(RootSlot::new(node)));
        id
    }

    pub(crate) fn get(&self, id: RootId) -> Option<&RootSlot<S>> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: RootId) -> Option<&mut RootSlot<S>> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub(crate) fn remove(&mut self, id: RootId) -> Option<RootSlot<S>> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    /// Number of mounted roots
    pub(crate) fn mounted(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

// =============================================================================
// ROOT API
// =============================================================================

impl<S: NodeState, H: Host<S>> Scheduler<S, H> {
    /// Mount a new tree whose root node holds `initial_state`.
    pub fn create_root(&mut self, initial_state: S, mode: ScheduleMode) -> RootId {
        let root = self.roots.next_id();
        let id = self.nodes.next_id();
        let mut node = Node::new(id, NodeKind::Root, root, initial_state);
        node.mode = mode;
        self.nodes.insert(node);
        self.roots.insert(id);
        debug!(%root, node = %id, ?mode, "root created");
        root
    }

    /// Add a node under `parent`. It joins the parent's tree and inherits its
    /// scheduling mode.
    pub fn add_node(&mut self, parent: NodeId, kind: NodeKind, state: S) -> Result<NodeId> {
        let (root, mode) = self
            .nodes
            .active(parent)
            .map(|node| (node.root(), node.mode()))
            .ok_or(SchedulerError::UnknownNode(parent))?;

        let id = self.nodes.next_id();
        let mut node = Node::new(id, kind, root, state);
        node.mode = mode;
        node.parent = Some(parent);
        self.nodes.insert(node);

        let slot = self.roots.get_mut(root).ok_or(SchedulerError::UnknownRoot(root))?;
        slot.members.push(id);
        Ok(id)
    }

    /// Replace the inputs handed to `node`'s payload functions from the next
    /// render on.
    pub fn set_inputs(&mut self, node: NodeId, inputs: S::Inputs) -> Result<()> {
        let inputs = Rc::new(inputs);
        let (active, standby) = self
            .nodes
            .buffers_mut(node)
            .ok_or(SchedulerError::UnknownNode(node))?;
        active.inputs = Rc::clone(&inputs);
        if let Some(standby) = standby {
            standby.inputs = inputs;
        }
        Ok(())
    }

    /// Unmount a tree, dropping its nodes, batches and pending work.
    ///
    /// Unmounting the last root resets the shared scheduling state.
    pub fn unmount_root(&mut self, root: RootId) -> Result<()> {
        if self.roots.get(root).is_none() {
            return Err(SchedulerError::UnknownRoot(root));
        }
        remove_root_from_schedule(&mut self.state, &mut self.roots, root);

        let Some(slot) = self.roots.remove(root) else {
            return Err(SchedulerError::UnknownRoot(root));
        };
        for id in &slot.members {
            self.nodes.remove(*id);
        }
        self.batches.remove_root(root);
        debug!(%root, nodes = slot.members.len(), "root unmounted");

        if self.roots.mounted() == 0 {
            self.state.reset();
            debug!("last root unmounted, scheduler state reset");
        }
        Ok(())
    }

    // =========================================================================
    // SUBMITTING UPDATES
    // =========================================================================

    /// Render `children` into the root node at the priority the current
    /// context gives it.
    ///
    /// The returned handle commits when the update commits.
    pub fn render(&mut self, root: RootId, children: S::Partial) -> Result<WorkHandle> {
        let node = self.root_node(root).ok_or(SchedulerError::UnknownRoot(root))?;
        let current_time = self.request_current_time();
        let deadline = self.compute_expiration_for_node(current_time, node);
        self.render_at_deadline(root, children, deadline)
    }

    /// Render `children` into the root node at an explicit deadline.
    pub(crate) fn render_at_deadline(
        &mut self,
        root: RootId,
        children: S::Partial,
        deadline: Deadline,
    ) -> Result<WorkHandle> {
        let node = self.root_node(root).ok_or(SchedulerError::UnknownRoot(root))?;
        let work = WorkHandle::new();
        let handle = work.clone();
        let update = Update::with_callback(
            deadline,
            UpdateAction::Set(Patch::Value(children)),
            Box::new(move |_: &S| {
                handle.commit();
                Ok(())
            }),
        );
        self.schedule_at(node, update)?;
        Ok(work)
    }

    /// Submit an update against a stateful node. Returns the deadline it was
    /// given.
    pub fn schedule_update(
        &mut self,
        node: NodeId,
        action: UpdateAction<S>,
        callback: Option<UpdateCallback<S>>,
    ) -> Result<Deadline> {
        self.check_stateful(node)?;
        let current_time = self.request_current_time();
        let deadline = self.compute_expiration_for_node(current_time, node);
        let update = match callback {
            Some(callback) => Update::with_callback(deadline, action, callback),
            None => Update::new(deadline, action),
        };
        self.schedule_at(node, update)?;
        Ok(deadline)
    }

    /// Shallow-merge `partial` into `node`'s state.
    pub fn set_state(&mut self, node: NodeId, partial: S::Partial) -> Result<Deadline> {
        self.schedule_update(node, UpdateAction::Set(Patch::Value(partial)), None)
    }

    /// Replace `node`'s state.
    pub fn replace_state(&mut self, node: NodeId, state: S) -> Result<Deadline> {
        self.schedule_update(node, UpdateAction::Replace(Replacement::Value(state)), None)
    }

    /// Re-render `node` without changing its state.
    pub fn force_update(&mut self, node: NodeId) -> Result<Deadline> {
        self.schedule_update(node, UpdateAction::Force, None)
    }

    /// Ask `node` to recover: `patch` is queued as a captured update on its
    /// work-in-progress buffer and applied on the next render.
    pub fn capture_update(&mut self, node: NodeId, patch: Patch<S>) -> Result<Deadline> {
        self.check_stateful(node)?;
        let current_time = self.request_current_time();
        let deadline = self.compute_expiration_for_node(current_time, node);

        let update = Update::new(deadline, UpdateAction::Capture(patch));
        if !enqueue_captured_update(&mut self.nodes, node, update) {
            return Err(SchedulerError::UnknownNode(node));
        }
        if let Some(standby) = self.nodes.standby_mut(node) {
            standby.effect_flags |= EffectFlags::SHOULD_CAPTURE;
        }
        self.mark_pending(node, deadline);
        let root = self.owning_root(node)?;
        self.request_work(root)?;
        Ok(deadline)
    }

    fn check_stateful(&self, node: NodeId) -> Result<()> {
        let kind = self
            .nodes
            .active(node)
            .map(Node::kind)
            .ok_or(SchedulerError::UnknownNode(node))?;
        if !kind.holds_state() {
            return Err(SchedulerError::NotStateful(node));
        }
        Ok(())
    }

    fn owning_root(&self, node: NodeId) -> Result<RootId> {
        self.nodes
            .active(node)
            .map(Node::root)
            .ok_or(SchedulerError::UnknownNode(node))
    }

    /// Enqueue `update` on both buffers of `node` and schedule its root.
    fn schedule_at(&mut self, node: NodeId, update: UpdateRef<S>) -> Result<()> {
        let deadline = update.deadline();
        if !enqueue_update(&mut self.nodes, node, update) {
            return Err(SchedulerError::UnknownNode(node));
        }
        self.mark_pending(node, deadline);

        let root = self.owning_root(node)?;
        if let Some(slot) = self.roots.get_mut(root) {
            if slot.finished_work.take().is_some() {
                debug!(%root, "new update discarded parked work");
            }
        }
        self.request_work(root)
    }

    fn mark_pending(&mut self, node: NodeId, deadline: Deadline) {
        if let Some((active, standby)) = self.nodes.buffers_mut(node) {
            active.pending_deadline = active.pending_deadline.earliest(deadline);
            if let Some(standby) = standby {
                standby.pending_deadline = standby.pending_deadline.earliest(deadline);
            }
        }
    }

    /// Put `root` in the registry and flush right away if the context calls
    /// for it.
    fn request_work(&mut self, root: RootId) -> Result<()> {
        let deadline = self.root_pending_deadline(root);
        add_root_to_schedule(&mut self.state, &mut self.roots, root, deadline);
        trace!(%root, %deadline, "work requested");

        if self.state.is_rendering {
            // picked up when the current pass finishes
            return Ok(());
        }

        if self.state.is_batching_updates() {
            if self.state.is_unbatching_updates {
                self.state.next_flushed_root = Some(root);
                self.state.next_flushed_deadline = Deadline::SYNC;
                self.perform_work_on_root(root, Deadline::SYNC)?;
            }
            return Ok(());
        }

        if deadline.is_sync() {
            self.flush_sync()?;
        }
        Ok(())
    }

    // =========================================================================
    // READING
    // =========================================================================

    /// The root node of a mounted tree
    pub fn root_node(&self, root: RootId) -> Option<NodeId> {
        self.roots.get(root).map(|slot| slot.node)
    }

    /// Every node of a mounted tree, parents before children
    pub fn members(&self, root: RootId) -> Option<&[NodeId]> {
        self.roots.get(root).map(|slot| slot.members.as_slice())
    }

    /// Committed state of a node
    pub fn state_of(&self, node: NodeId) -> Option<&S> {
        self.nodes.active(node).map(Node::state)
    }

    /// Committed buffer of a node
    pub fn node(&self, node: NodeId) -> Option<&Node<S>> {
        self.nodes.active(node)
    }

    /// Most urgent deadline still pending on a node
    pub fn pending_deadline(&self, node: NodeId) -> Option<Deadline> {
        self.nodes.active(node).map(Node::pending_deadline)
    }

    /// Deadline the registry holds for `root` (`NO_WORK` when idle or parked)
    pub fn root_deadline(&self, root: RootId) -> Option<Deadline> {
        self.roots.get(root).map(|slot| slot.deadline)
    }

    /// Whether rendered work is parked on `root`, waiting for a batch commit
    pub fn has_parked_work(&self, root: RootId) -> bool {
        self.roots.get(root).is_some_and(|slot| slot.finished_work.is_some())
    }

    /// Roots in the registry, in the order they were scheduled
    pub fn scheduled_roots(&self) -> Vec<RootId> {
        scheduled_roots(&self.state, &self.roots)
    }

    /// Number of mounted roots
    pub fn root_count(&self) -> usize {
        self.roots.mounted()
    }
}

// =============================================================================
// TESTS
// =============================================================================
