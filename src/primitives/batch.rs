// ============================================================================
// spark-scheduler - Batch
// Caller-controlled groups of root updates that commit together
// ============================================================================
//
// A batch renders into its root at its own unique async deadline, but the
// result is held back until the caller commits the batch. Each root keeps
// its batches in a list ordered by (deadline, insertion):
//
//   root.first_batch ─▶ B1 (t527) ─▶ B2 (t528) ─▶ B3 (t529)
//
// Only the head batch can hold back a flush. Committing B2 first promotes
// it: its children are rendered again at B1's deadline, it moves to the head
// and the root is flushed synchronously. B1 stays in the list, with its own
// children rendered again so the next flush picks them up.
// ============================================================================

use tracing::debug;

use crate::core::deadline::Deadline;
use crate::core::error::{Result, SchedulerError};
use crate::core::types::{BatchId, NodeState, RootId};
use crate::scheduler::engine::Scheduler;
use crate::scheduler::host::Host;

use super::work::WorkHandle;

// =============================================================================
// BATCH STORAGE
// =============================================================================

/// Internal state of one batch.
pub(crate) struct BatchSlot<S: NodeState> {
    pub(crate) root: RootId,
    pub(crate) deadline: Deadline,
    pub(crate) has_children: bool,
    pub(crate) children: Option<S::Partial>,
    pub(crate) defer: bool,
    pub(crate) next: Option<BatchId>,
    /// Committed once a flush has rendered this batch
    pub(crate) completion: WorkHandle,
}

/// Arena of batches. Handles are never reused.
pub(crate) struct BatchTable<S: NodeState> {
    slots: Vec<Option<BatchSlot<S>>>,
}

impl<S: NodeState> BatchTable<S> {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn insert(&mut self, slot: BatchSlot<S>) -> BatchId {
        let id = BatchId::from_index(self.slots.len());
        self.slots.push(Some(slot));
        id
    }

    pub(crate) fn get(&self, id: BatchId) -> Option<&BatchSlot<S>> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: BatchId) -> Option<&mut BatchSlot<S>> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Drop every batch belonging to `root`.
    pub(crate) fn remove_root(&mut self, root: RootId) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|batch| batch.root == root) {
                *slot = None;
            }
        }
    }
}

// =============================================================================
// BATCH HANDLE
// =============================================================================

/// Handle to a batch created with [`Scheduler::create_batch`].
///
/// Batches are single-use: render any number of times, then commit once.
///
/// # Example
///
/// ```
/// use spark_scheduler::{NoopHost, ScheduleMode, Scheduler};
/// use std::collections::BTreeMap;
///
/// let mut scheduler = Scheduler::new(NoopHost);
/// let root = scheduler.create_root(BTreeMap::new(), ScheduleMode::ASYNC);
/// let node = scheduler.root_node(root).unwrap();
///
/// let batch = scheduler.create_batch(root).unwrap();
/// let work = batch.render(&mut scheduler, BTreeMap::from([("page", 2)])).unwrap();
///
/// // flushing renders the batch but holds the commit back
/// scheduler.flush_all().unwrap();
/// assert!(batch.is_complete(&scheduler));
/// assert!(!work.is_committed());
///
/// batch.commit(&mut scheduler).unwrap();
/// assert!(work.is_committed());
/// assert_eq!(scheduler.state_of(node).unwrap().get("page"), Some(&2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Batch {
    id: BatchId,
    root: RootId,
}

impl Batch {
    /// The batch handle
    pub fn id(self) -> BatchId {
        self.id
    }

    /// Root the batch belongs to
    pub fn root(self) -> RootId {
        self.root
    }

    /// Submit `children` to the root at this batch's deadline.
    ///
    /// The returned handle commits once the update commits.
    pub fn render<S: NodeState, H: Host<S>>(
        self,
        scheduler: &mut Scheduler<S, H>,
        children: S::Partial,
    ) -> Result<WorkHandle> {
        scheduler.render_batch(self.id, children)
    }

    /// Flush this batch, and every batch ahead of it, synchronously.
    ///
    /// Committing a batch that never rendered anything, or committing twice,
    /// does nothing.
    pub fn commit<S: NodeState, H: Host<S>>(self, scheduler: &mut Scheduler<S, H>) -> Result<()> {
        scheduler.commit_batch(self.id)
    }

    /// Run `callback` once a flush has rendered this batch, or now if one
    /// already has. The commit may still be pending at that point.
    pub fn then<S: NodeState, H: Host<S>>(
        self,
        scheduler: &Scheduler<S, H>,
        callback: impl FnOnce() + 'static,
    ) -> Result<()> {
        let batch = scheduler
            .batches
            .get(self.id)
            .ok_or(SchedulerError::UnknownBatch(self.id))?;
        batch.completion.then(callback);
        Ok(())
    }

    /// Current deadline. Changes when the batch is promoted.
    pub fn deadline<S: NodeState, H: Host<S>>(self, scheduler: &Scheduler<S, H>) -> Option<Deadline> {
        scheduler.batches.get(self.id).map(|batch| batch.deadline)
    }

    /// Whether a flush has rendered this batch
    pub fn is_complete<S: NodeState, H: Host<S>>(self, scheduler: &Scheduler<S, H>) -> bool {
        scheduler
            .batches
            .get(self.id)
            .is_some_and(|batch| batch.completion.is_committed())
    }

    /// Whether the batch still holds back its root's commit
    pub fn is_deferred<S: NodeState, H: Host<S>>(self, scheduler: &Scheduler<S, H>) -> bool {
        scheduler.batches.get(self.id).is_some_and(|batch| batch.defer)
    }
}

// =============================================================================
// SCHEDULER INTEGRATION
// =============================================================================

impl<S: NodeState, H: Host<S>> Scheduler<S, H> {
    /// Create a batch on `root` with a fresh unique async deadline.
    ///
    /// The batch is inserted after every batch whose deadline is at or before
    /// its own.
    pub fn create_batch(&mut self, root: RootId) -> Result<Batch> {
        if self.roots.get(root).is_none() {
            return Err(SchedulerError::UnknownRoot(root));
        }
        let deadline = self.compute_unique_async_deadline();
        let id = self.batches.insert(BatchSlot {
            root,
            deadline,
            has_children: false,
            children: None,
            defer: true,
            next: None,
            completion: WorkHandle::new(),
        });

        let mut insert_after = None;
        let mut insert_before = self.roots.get(root).and_then(|slot| slot.first_batch);
        while let Some(current) = insert_before {
            let Some(batch) = self.batches.get(current) else {
                break;
            };
            if !batch.deadline.is_within(deadline) {
                break;
            }
            insert_after = Some(current);
            insert_before = batch.next;
        }

        if let Some(batch) = self.batches.get_mut(id) {
            batch.next = insert_before;
        }
        match insert_after {
            Some(after) => {
                if let Some(batch) = self.batches.get_mut(after) {
                    batch.next = Some(id);
                }
            }
            None => {
                if let Some(slot) = self.roots.get_mut(root) {
                    slot.first_batch = Some(id);
                }
            }
        }

        debug!(batch = %id, %root, %deadline, "batch created");
        Ok(Batch { id, root })
    }

    fn render_batch(&mut self, id: BatchId, children: S::Partial) -> Result<WorkHandle> {
        let batch = self.batches.get_mut(id).ok_or(SchedulerError::UnknownBatch(id))?;
        batch.has_children = true;
        batch.children = Some(children.clone());
        let (root, deadline) = (batch.root, batch.deadline);
        self.render_at_deadline(root, children, deadline)
    }

    fn commit_batch(&mut self, id: BatchId) -> Result<()> {
        let (root, has_children) = self
            .batches
            .get(id)
            .map(|batch| (batch.root, batch.has_children))
            .ok_or(SchedulerError::UnknownBatch(id))?;

        if !has_children {
            self.detach_batch(root, id);
            if let Some(batch) = self.batches.get_mut(id) {
                batch.defer = false;
            }
            return Ok(());
        }

        let first = self.roots.get(root).and_then(|slot| slot.first_batch);
        if let Some(first) = first.filter(|first| *first != id) {
            self.promote_batch(root, id, first)?;
        }

        let deadline = match self.batches.get_mut(id) {
            Some(batch) => {
                batch.defer = false;
                batch.deadline
            }
            None => return Err(SchedulerError::UnknownBatch(id)),
        };
        // after a promotion this is the former head's deadline
        self.flush_root(root, deadline)?;

        // pop this batch off the head
        let next = self.batches.get_mut(id).and_then(|batch| {
            batch.has_children = false;
            batch.children = None;
            batch.next.take()
        });
        if let Some(slot) = self.roots.get_mut(root) {
            slot.first_batch = next;
        }

        // get the new head ready for the next flush
        let pending = next
            .and_then(|head| self.batches.get(head))
            .filter(|batch| batch.has_children)
            .and_then(|batch| batch.children.clone().map(|children| (children, batch.deadline)));
        if let Some((children, deadline)) = pending {
            self.render_at_deadline(root, children, deadline)?;
        }
        Ok(())
    }

    /// Move `id` to the head of the batch list, re-rendering its children at
    /// the current head's deadline.
    fn promote_batch(&mut self, root: RootId, id: BatchId, first: BatchId) -> Result<()> {
        let head_deadline = self
            .batches
            .get(first)
            .map(|batch| batch.deadline)
            .ok_or(SchedulerError::UnknownBatch(first))?;

        let children = match self.batches.get_mut(id) {
            Some(batch) => {
                batch.deadline = head_deadline;
                batch.children.clone()
            }
            None => return Err(SchedulerError::UnknownBatch(id)),
        };
        if let Some(children) = children {
            self.render_at_deadline(root, children, head_deadline)?;
        }

        self.detach_batch(root, id);
        if let Some(batch) = self.batches.get_mut(id) {
            batch.next = Some(first);
        }
        if let Some(slot) = self.roots.get_mut(root) {
            slot.first_batch = Some(id);
        }
        debug!(batch = %id, %root, deadline = %head_deadline, "batch promoted to head");
        Ok(())
    }

    /// Unlink `id` from its root's batch list, wherever it is.
    fn detach_batch(&mut self, root: RootId, id: BatchId) {
        let next = self.batches.get_mut(id).and_then(|batch| batch.next.take());

        let mut previous = None;
        let mut cursor = self.roots.get(root).and_then(|slot| slot.first_batch);
        while let Some(current) = cursor {
            if current == id {
                match previous {
                    None => {
                        if let Some(slot) = self.roots.get_mut(root) {
                            slot.first_batch = next;
                        }
                    }
                    Some(prev) => {
                        if let Some(batch) = self.batches.get_mut(prev) {
                            batch.next = next;
                        }
                    }
                }
                return;
            }
            previous = Some(current);
            cursor = self.batches.get(current).and_then(|batch| batch.next);
        }
    }

    /// Batches of `root`, head first
    pub fn batches_of(&self, root: RootId) -> Vec<Batch> {
        let mut out = Vec::new();
        let mut cursor = self.roots.get(root).and_then(|slot| slot.first_batch);
        while let Some(id) = cursor {
            out.push(Batch { id, root });
            cursor = self.batches.get(id).and_then(|batch| batch.next);
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================
