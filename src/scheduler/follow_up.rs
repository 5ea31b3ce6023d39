// ============================================================================
// spark-scheduler - Follow-up Updates
// Updates submitted from inside a flush
// ============================================================================
//
// Update functions, completion callbacks and work subscribers run while the
// scheduler is borrowed, so they cannot call `schedule_update` directly.
// They push onto a shared `FollowUps` handle instead. The scheduler drains
// it at fixed points of a pass:
//
//   end of render   render-phase priority (the deadline being rendered)
//   commit          synchronous
//   after the pass  the ordinary rules for the node
// ============================================================================

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::core::error::Result;
use crate::core::types::{NodeId, NodeState};
use crate::fiber::update_queue::{Patch, Replacement, UpdateAction, UpdateCallback};

use super::engine::Scheduler;
use super::host::Host;

struct FollowUp<S: NodeState> {
    node: NodeId,
    action: UpdateAction<S>,
    callback: Option<UpdateCallback<S>>,
}

/// Shared queue of updates waiting to be submitted by the scheduler.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```
/// use spark_scheduler::{ManualClock, NoopHost, ScheduleMode, Scheduler};
/// use std::collections::BTreeMap;
///
/// let mut scheduler = Scheduler::with_clock(NoopHost, ManualClock::new());
/// let root = scheduler.create_root(BTreeMap::new(), ScheduleMode::SYNC);
/// let node = scheduler.root_node(root).unwrap();
///
/// let follow_ups = scheduler.follow_ups();
/// let work = scheduler.render(root, BTreeMap::from([("a", 1)])).unwrap();
/// work.then(move || follow_ups.set_state(node, BTreeMap::from([("b", 2)])));
///
/// scheduler.submit_follow_ups().unwrap();
/// assert_eq!(scheduler.state_of(node).unwrap().get("b"), Some(&2));
/// ```
pub struct FollowUps<S: NodeState> {
    queue: Rc<RefCell<VecDeque<FollowUp<S>>>>,
}

impl<S: NodeState> FollowUps<S> {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Queue `action` against `node`, with an optional completion callback.
    pub fn schedule_update(&self, node: NodeId, action: UpdateAction<S>, callback: Option<UpdateCallback<S>>) {
        trace!(%node, tag = ?action.tag(), "follow-up queued");
        self.queue.borrow_mut().push_back(FollowUp { node, action, callback });
    }

    /// Queue a merge of `partial` into `node`'s state.
    pub fn set_state(&self, node: NodeId, partial: S::Partial) {
        self.schedule_update(node, UpdateAction::Set(Patch::Value(partial)), None);
    }

    /// Queue a replacement of `node`'s state.
    pub fn replace_state(&self, node: NodeId, state: S) {
        self.schedule_update(node, UpdateAction::Replace(Replacement::Value(state)), None);
    }

    /// Queue a re-render of `node`.
    pub fn force_update(&self, node: NodeId) {
        self.schedule_update(node, UpdateAction::Force, None);
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn pop(&self) -> Option<FollowUp<S>> {
        self.queue.borrow_mut().pop_front()
    }
}

impl<S: NodeState> Default for FollowUps<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: NodeState> Clone for FollowUps<S> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
        }
    }
}

impl<S: NodeState> fmt::Debug for FollowUps<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FollowUps").field("queued", &self.len()).finish()
    }
}

// =============================================================================
// SUBMISSION
// =============================================================================

impl<S: NodeState, H: Host<S>> Scheduler<S, H> {
    /// Handle for queueing updates from code running inside a flush.
    pub fn follow_ups(&self) -> FollowUps<S> {
        self.follow_ups.clone()
    }

    /// Submit every queued follow-up in push order.
    ///
    /// Entries pushed while submitting are submitted too. Stops at the first
    /// rejected update; the rest stay queued.
    pub fn submit_follow_ups(&mut self) -> Result<()> {
        while let Some(follow_up) = self.follow_ups.pop() {
            self.schedule_update(follow_up.node, follow_up.action, follow_up.callback)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
