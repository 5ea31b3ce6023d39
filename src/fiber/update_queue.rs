// ============================================================================
// spark-scheduler - Update Queue
// Persistent, double-buffered log of pending state updates
// ============================================================================
//
// Queues come in pairs, like the nodes that own them: the active queue holds
// what has been committed, the standby queue is what a render mutates. Both
// point into one persistent singly-linked list of updates. Enqueueing appends
// to both so an update is never lost when a render restarts from the active
// queue, nor when a finished render swaps standby in. Because the lists share
// their tail, an update is linked in once and the second queue only moves its
// tail pointer.
//
//   active:   A - B - C - D - E - F
//   standby:              D - E - F
//                         ^ standby has processed further than active
//
// Updates are kept in insertion order and never sorted. Priority only matters
// while processing: an update whose deadline is later than the render's is
// skipped, and so is everything after it, regardless of priority, until a
// lower priority render replays them from the snapshot taken at the first
// skip. With a base state of "" and A1 - B2 - C1 - D2:
//
//   render at 1:  base ""   applies A1, C1        -> "AC"  (base stays "A")
//   render at 2:  base "A"  applies B2, C1, D2    -> "ABCD"
//
// Replaying from the snapshot in insertion order is what makes the drained
// result independent of how many partial passes happened on the way.
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::core::constants::EffectFlags;
use crate::core::deadline::Deadline;
use crate::core::error::{CallbackError, UpdateError};
use crate::core::types::{NodeId, NodeState};

use super::node::{Node, NodeArena};

// =============================================================================
// PAYLOADS
// =============================================================================

/// A function computing a partial state from the previous state and inputs.
/// Returning `Ok(None)` leaves the state untouched.
pub type PatchFn<S> = dyn Fn(&S, &<S as NodeState>::Inputs) -> Result<Option<<S as NodeState>::Partial>, UpdateError>;

/// A function computing a whole new state from the previous state and inputs.
pub type ReplaceFn<S> = dyn Fn(&S, &<S as NodeState>::Inputs) -> Result<S, UpdateError>;

/// A one-shot callback fired after the update commits. It receives the
/// committed state of the node it was queued on.
pub type UpdateCallback<S> = Box<dyn FnOnce(&S) -> Result<(), CallbackError>>;

/// Payload of `Set` and `Capture` updates.
pub enum Patch<S: NodeState> {
    /// A fixed partial state
    Value(S::Partial),
    /// A partial state computed at processing time
    Compute(Rc<PatchFn<S>>),
}

impl<S: NodeState> Patch<S> {
    /// Wrap a patch function
    pub fn compute(
        f: impl Fn(&S, &S::Inputs) -> Result<Option<S::Partial>, UpdateError> + 'static,
    ) -> Self {
        Self::Compute(Rc::new(f))
    }

    fn resolve(&self, prev: &S, inputs: &S::Inputs) -> Result<Option<S::Partial>, UpdateError> {
        match self {
            Self::Value(partial) => Ok(Some(partial.clone())),
            Self::Compute(f) => f(prev, inputs),
        }
    }
}

/// Payload of `Replace` updates.
pub enum Replacement<S: NodeState> {
    /// A fixed state
    Value(S),
    /// A state computed at processing time
    Compute(Rc<ReplaceFn<S>>),
}

impl<S: NodeState> Replacement<S> {
    /// Wrap a replacement function
    pub fn compute(f: impl Fn(&S, &S::Inputs) -> Result<S, UpdateError> + 'static) -> Self {
        Self::Compute(Rc::new(f))
    }

    fn resolve(&self, prev: &S, inputs: &S::Inputs) -> Result<S, UpdateError> {
        match self {
            Self::Value(state) => Ok(state.clone()),
            Self::Compute(f) => f(prev, inputs),
        }
    }
}

/// What an update does, with its payload.
pub enum UpdateAction<S: NodeState> {
    /// Shallow-merge a partial state
    Set(Patch<S>),
    /// Substitute the whole state
    Replace(Replacement<S>),
    /// Leave the state alone but report a forced update
    Force,
    /// Like `Set`, and mark the node as having recovered from a capture
    Capture(Patch<S>),
}

/// The variant of an [`UpdateAction`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateTag {
    /// See [`UpdateAction::Set`]
    Set,
    /// See [`UpdateAction::Replace`]
    Replace,
    /// See [`UpdateAction::Force`]
    Force,
    /// See [`UpdateAction::Capture`]
    Capture,
}

impl<S: NodeState> UpdateAction<S> {
    /// The tag of this action
    pub fn tag(&self) -> UpdateTag {
        match self {
            Self::Set(_) => UpdateTag::Set,
            Self::Replace(_) => UpdateTag::Replace,
            Self::Force => UpdateTag::Force,
            Self::Capture(_) => UpdateTag::Capture,
        }
    }
}

// =============================================================================
// UPDATE
// =============================================================================

/// Shared reference to an update in the persistent list
pub type UpdateRef<S> = Rc<Update<S>>;

/// A single requested mutation.
///
/// The deadline and action never change once the update is created. Only the
/// link fields move, and the callback slot is emptied when it fires.
pub struct Update<S: NodeState> {
    deadline: Deadline,
    action: UpdateAction<S>,
    callback: RefCell<Option<UpdateCallback<S>>>,
    next: RefCell<Option<UpdateRef<S>>>,
    next_effect: RefCell<Option<UpdateRef<S>>>,
}

impl<S: NodeState> Update<S> {
    /// Create an update without a completion callback
    pub fn new(deadline: Deadline, action: UpdateAction<S>) -> UpdateRef<S> {
        Rc::new(Self {
            deadline,
            action,
            callback: RefCell::new(None),
            next: RefCell::new(None),
            next_effect: RefCell::new(None),
        })
    }

    /// Create an update that fires `callback` once it commits
    pub fn with_callback(
        deadline: Deadline,
        action: UpdateAction<S>,
        callback: UpdateCallback<S>,
    ) -> UpdateRef<S> {
        Rc::new(Self {
            deadline,
            action,
            callback: RefCell::new(Some(callback)),
            next: RefCell::new(None),
            next_effect: RefCell::new(None),
        })
    }

    /// When this update is due
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// The action and payload
    pub fn action(&self) -> &UpdateAction<S> {
        &self.action
    }

    /// The action's tag
    pub fn tag(&self) -> UpdateTag {
        self.action.tag()
    }

    /// Whether the completion callback is still waiting to fire
    pub fn has_callback(&self) -> bool {
        self.callback.borrow().is_some()
    }

    /// Next update in the persistent list
    pub fn next(&self) -> Option<UpdateRef<S>> {
        self.next.borrow().clone()
    }

    fn set_next(&self, next: Option<UpdateRef<S>>) {
        *self.next.borrow_mut() = next;
    }

    fn next_effect(&self) -> Option<UpdateRef<S>> {
        self.next_effect.borrow().clone()
    }

    fn set_next_effect(&self, next: Option<UpdateRef<S>>) {
        *self.next_effect.borrow_mut() = next;
    }

    fn take_callback(&self) -> Option<UpdateCallback<S>> {
        self.callback.borrow_mut().take()
    }
}

impl<S: NodeState> fmt::Debug for Update<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("deadline", &self.deadline)
            .field("tag", &self.tag())
            .field("has_callback", &self.has_callback())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CHAINS
// =============================================================================

/// Head and tail of a singly-linked run of updates
struct Chain<S: NodeState> {
    first: Option<UpdateRef<S>>,
    last: Option<UpdateRef<S>>,
}

impl<S: NodeState> Chain<S> {
    const fn empty() -> Self {
        Self {
            first: None,
            last: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    fn clear(&mut self) {
        self.first = None;
        self.last = None;
    }

    /// Link through `next`
    fn push_update(&mut self, update: UpdateRef<S>) {
        match &self.last {
            None => self.first = Some(Rc::clone(&update)),
            Some(last) => last.set_next(Some(Rc::clone(&update))),
        }
        self.last = Some(update);
    }

    /// Move `last` to the true end of the persistent list. Another queue may
    /// have linked updates past this tail.
    fn seek_end(&mut self) {
        let Some(mut last) = self.last.clone() else {
            return;
        };
        while let Some(next) = last.next() {
            last = next;
        }
        self.last = Some(last);
    }

    /// Link through `next_effect`
    fn push_effect(&mut self, update: UpdateRef<S>) {
        update.set_next_effect(None);
        match &self.last {
            None => self.first = Some(Rc::clone(&update)),
            Some(last) => last.set_next_effect(Some(Rc::clone(&update))),
        }
        self.last = Some(update);
    }
}

impl<S: NodeState> Clone for Chain<S> {
    fn clone(&self) -> Self {
        Self {
            first: self.first.clone(),
            last: self.last.clone(),
        }
    }
}

/// Captured updates detached from a queue, see [`UpdateQueue::take_captured`]
pub struct CapturedUpdates<S: NodeState>(Chain<S>);

impl<S: NodeState> CapturedUpdates<S> {
    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// UPDATE QUEUE
// =============================================================================

/// Per-node log of pending updates.
pub struct UpdateQueue<S: NodeState> {
    base_state: S,
    updates: Chain<S>,
    captured_updates: Chain<S>,
    effects: Chain<S>,
    captured_effects: Chain<S>,
}

impl<S: NodeState> UpdateQueue<S> {
    /// Create an empty queue whose base is `base_state`
    pub fn new(base_state: S) -> Self {
        Self {
            base_state,
            updates: Chain::empty(),
            captured_updates: Chain::empty(),
            effects: Chain::empty(),
            captured_effects: Chain::empty(),
        }
    }

    /// Shallow copy for the other buffer: same base state and update list,
    /// fresh captured and effect lists.
    pub fn clone_for_work_in_progress(&self) -> Self {
        Self {
            base_state: self.base_state.clone(),
            updates: self.updates.clone(),
            captured_updates: Chain::empty(),
            effects: Chain::empty(),
            captured_effects: Chain::empty(),
        }
    }

    /// State before the first unprocessed update
    pub fn base_state(&self) -> &S {
        &self.base_state
    }

    /// First unprocessed update
    pub fn first_update(&self) -> Option<&UpdateRef<S>> {
        self.updates.first.as_ref()
    }

    /// Tail of the update list, cleared once a pass drains the queue
    pub fn last_update(&self) -> Option<&UpdateRef<S>> {
        self.updates.last.as_ref()
    }

    /// First unprocessed captured update
    pub fn first_captured_update(&self) -> Option<&UpdateRef<S>> {
        self.captured_updates.first.as_ref()
    }

    /// Whether any update is still waiting to be processed
    pub fn has_pending_updates(&self) -> bool {
        !self.updates.is_empty() || !self.captured_updates.is_empty()
    }

    /// Whether any callback is waiting for commit
    pub fn has_pending_effects(&self) -> bool {
        !self.effects.is_empty() || !self.captured_effects.is_empty()
    }

    /// Iterate the unprocessed updates in insertion order.
    pub fn pending_updates(&self) -> ChainIter<S> {
        ChainIter {
            next: self.updates.first.clone(),
        }
    }

    /// Iterate the unprocessed captured updates in insertion order.
    pub fn pending_captured_updates(&self) -> ChainIter<S> {
        ChainIter {
            next: self.captured_updates.first.clone(),
        }
    }

    /// Append to the end of the update list.
    pub fn append(&mut self, update: UpdateRef<S>) {
        self.updates.push_update(update);
    }

    /// Append to the end of the captured list.
    pub fn append_captured(&mut self, update: UpdateRef<S>) {
        self.captured_updates.push_update(update);
    }

    /// Detach the captured list.
    pub fn take_captured(&mut self) -> CapturedUpdates<S> {
        CapturedUpdates(std::mem::replace(&mut self.captured_updates, Chain::empty()))
    }

    /// Re-attach a captured list taken with [`UpdateQueue::take_captured`].
    pub fn restore_captured(&mut self, captured: CapturedUpdates<S>) {
        self.captured_updates = captured.0;
    }

    /// Whether this queue's tail is the same update as `other`'s tail.
    fn shares_tail_with(&self, other: &Self) -> bool {
        match (&self.updates.last, &other.updates.last) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<S: NodeState + fmt::Debug> fmt::Debug for UpdateQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending: Vec<_> = self.pending_updates().map(|u| u.deadline()).collect();
        f.debug_struct("UpdateQueue")
            .field("base_state", &self.base_state)
            .field("pending", &pending)
            .field("has_pending_effects", &self.has_pending_effects())
            .finish_non_exhaustive()
    }
}

/// Iterator following `next` links
pub struct ChainIter<S: NodeState> {
    next: Option<UpdateRef<S>>,
}

impl<S: NodeState> Iterator for ChainIter<S> {
    type Item = UpdateRef<S>;

    fn next(&mut self) -> Option<UpdateRef<S>> {
        let current = self.next.take()?;
        self.next = current.next();
        Some(current)
    }
}

// =============================================================================
// ENQUEUE
// =============================================================================

/// Append `update` to a node's queue and to its alternate's queue.
///
/// Queues are created lazily. Each buffer ends up seeing the update exactly
/// once: when both queues end at the same update the list is extended once
/// and the second queue only advances its tail.
///
/// Returns `false` if the node does not exist.
pub fn enqueue_update<S: NodeState>(
    arena: &mut NodeArena<S>,
    id: NodeId,
    update: UpdateRef<S>,
) -> bool {
    let Some((node, alternate)) = arena.buffers_mut(id) else {
        return false;
    };

    trace!(node = %id, deadline = %update.deadline(), tag = ?update.tag(), "enqueue update");

    let Some(alternate) = alternate else {
        // a single buffer owns the only queue
        node.queue
            .get_or_insert_with(|| UpdateQueue::new(node.memoized_state.clone()))
            .append(update);
        return true;
    };

    if node.queue.is_none() {
        node.queue = Some(match &alternate.queue {
            None => UpdateQueue::new(node.memoized_state.clone()),
            Some(other) => other.clone_for_work_in_progress(),
        });
    }
    if alternate.queue.is_none() {
        alternate.queue = Some(UpdateQueue::new(alternate.memoized_state.clone()));
    }

    let (Some(queue1), Some(queue2)) = (node.queue.as_mut(), alternate.queue.as_mut()) else {
        return false;
    };

    // a commit may have spliced captured updates past either tail
    queue1.updates.seek_end();
    queue2.updates.seek_end();

    if queue1.shares_tail_with(queue2) {
        // one link serves both lists; only the second tail pointer moves
        queue1.append(Rc::clone(&update));
        queue2.updates.last = Some(update);
    } else {
        queue1.append(Rc::clone(&update));
        queue2.append(update);
    }
    true
}

/// Append `update` to the captured list of a node's work-in-progress queue.
///
/// Captured updates only ever live on the standby buffer; commit splices them
/// onto the normal list so a later, lower priority render rebases them.
///
/// Returns `false` if the node does not exist.
pub fn enqueue_captured_update<S: NodeState>(
    arena: &mut NodeArena<S>,
    id: NodeId,
    update: UpdateRef<S>,
) -> bool {
    if arena.ensure_standby(id).is_none() {
        return false;
    }
    let Some(work_in_progress) = arena.standby_mut(id) else {
        return false;
    };

    trace!(node = %id, deadline = %update.deadline(), "enqueue captured update");

    work_in_progress
        .queue
        .get_or_insert_with(|| UpdateQueue::new(work_in_progress.memoized_state.clone()))
        .append_captured(update);
    true
}

// =============================================================================
// PROCESS
// =============================================================================

/// Side results of a processing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
    /// A `Force` update was applied
    pub forced_update: bool,
    /// Number of updates applied
    pub applied: usize,
    /// Number of updates skipped for insufficient priority
    pub skipped: usize,
}

/// Running bookkeeping shared by the normal and captured walks
struct Pass<'a, S: NodeState> {
    inputs: &'a S::Inputs,
    render_deadline: Deadline,
    result: S,
    base_state: Option<S>,
    remaining: Deadline,
    flags: EffectFlags,
    outcome: ProcessOutcome,
}

impl<S: NodeState> Pass<'_, S> {
    /// Walk one list, returning the first skipped update and the applied
    /// updates that carry callbacks.
    fn walk(
        &mut self,
        first: Option<UpdateRef<S>>,
        snapshot_on_skip: bool,
    ) -> Result<(Option<UpdateRef<S>>, Vec<UpdateRef<S>>), UpdateError> {
        let mut first_skipped = None;
        let mut effects = Vec::new();
        let mut cursor = first;

        while let Some(update) = cursor {
            if !update.deadline().is_within(self.render_deadline) {
                self.outcome.skipped += 1;
                if first_skipped.is_none() {
                    first_skipped = Some(Rc::clone(&update));
                    if snapshot_on_skip && self.base_state.is_none() {
                        self.base_state = Some(self.result.clone());
                    }
                }
                self.remaining = self.remaining.earliest(update.deadline());
            } else {
                self.result = self.apply(&update)?;
                self.outcome.applied += 1;
                if update.has_callback() {
                    self.flags |= EffectFlags::CALLBACK;
                    effects.push(Rc::clone(&update));
                }
            }
            cursor = update.next();
        }

        Ok((first_skipped, effects))
    }

    fn apply(&mut self, update: &Update<S>) -> Result<S, UpdateError> {
        let prev = &self.result;
        match update.action() {
            UpdateAction::Replace(replacement) => replacement.resolve(prev, self.inputs),
            UpdateAction::Capture(patch) => {
                self.flags = (self.flags - EffectFlags::SHOULD_CAPTURE) | EffectFlags::DID_CAPTURE;
                merge_patch(prev, patch, self.inputs)
            }
            UpdateAction::Set(patch) => merge_patch(prev, patch, self.inputs),
            UpdateAction::Force => {
                self.outcome.forced_update = true;
                Ok(prev.clone())
            }
        }
    }
}

fn merge_patch<S: NodeState>(prev: &S, patch: &Patch<S>, inputs: &S::Inputs) -> Result<S, UpdateError> {
    Ok(match patch.resolve(prev, inputs)? {
        Some(partial) => prev.merge(&partial),
        // no patch means no change
        None => prev.clone(),
    })
}

/// Apply every update in `node`'s queue that is due by `render_deadline`.
///
/// Skipped updates stay queued, together with everything after them; the
/// state just before the first skip becomes the new base state. The node's
/// memoized state, pending deadline and effect flags are updated, and applied
/// updates with callbacks are linked into the queue's effect lists for
/// [`commit_update_queue`].
///
/// Processing is all-or-nothing: if a payload function fails, the node and
/// its queue are left exactly as they were.
pub fn process_update_queue<S: NodeState>(
    node: &mut Node<S>,
    inputs: &S::Inputs,
    render_deadline: Deadline,
) -> Result<ProcessOutcome, UpdateError> {
    let node_id = node.id;
    let queue = node
        .queue
        .get_or_insert_with(|| UpdateQueue::new(node.memoized_state.clone()));

    let mut pass = Pass {
        inputs,
        render_deadline,
        result: queue.base_state.clone(),
        base_state: None,
        remaining: Deadline::NO_WORK,
        flags: node.effect_flags,
        outcome: ProcessOutcome::default(),
    };

    let (first_skipped, effects) = pass.walk(queue.updates.first.clone(), true)?;
    // the captured walk only snapshots if the normal walk kept nothing
    let snapshot_captured = first_skipped.is_none();
    let (first_skipped_captured, captured_effects) =
        pass.walk(queue.captured_updates.first.clone(), snapshot_captured)?;
    // captured updates applied on top of a skipped update replay with it
    let first_skipped_captured = if first_skipped.is_some() {
        queue.captured_updates.first.clone()
    } else {
        first_skipped_captured
    };

    // --- commit point: nothing below can fail ---

    for update in effects {
        queue.effects.push_effect(update);
    }
    for update in captured_effects {
        queue.captured_effects.push_effect(update);
    }

    if first_skipped.is_none() {
        queue.updates.last = None;
    }
    if first_skipped_captured.is_none() {
        queue.captured_updates.last = None;
    } else {
        // captured updates always notify
        pass.flags |= EffectFlags::CALLBACK;
    }

    let drained = first_skipped.is_none() && first_skipped_captured.is_none();
    queue.base_state = match (drained, pass.base_state) {
        (false, Some(snapshot)) => snapshot,
        _ => pass.result.clone(),
    };
    queue.updates.first = first_skipped;
    queue.captured_updates.first = first_skipped_captured;

    trace!(
        node = %node_id,
        render = %render_deadline,
        applied = pass.outcome.applied,
        skipped = pass.outcome.skipped,
        remaining = %pass.remaining,
        "processed update queue"
    );

    node.effect_flags = pass.flags;
    node.pending_deadline = pass.remaining;
    node.memoized_state = pass.result;
    Ok(pass.outcome)
}

// =============================================================================
// COMMIT
// =============================================================================

/// Fire the callbacks collected by [`process_update_queue`].
///
/// Captured updates that are still queued are appended to the normal list
/// first, so a lower priority render rebases them instead of dropping them.
/// Each callback is detached before it runs and fires exactly once. A failing
/// callback does not stop the others; the first failure is returned once
/// every callback has run.
pub fn commit_update_queue<S: NodeState>(node: &mut Node<S>) -> Result<(), CallbackError> {
    let Some(queue) = node.queue.as_mut() else {
        return Ok(());
    };

    if let Some(first_captured) = queue.captured_updates.first.take() {
        queue.updates.seek_end();
        match &queue.updates.last {
            Some(last) => last.set_next(Some(first_captured)),
            None => queue.updates.first = Some(first_captured),
        }
        queue.updates.last = queue.captured_updates.last.take();
        queue.captured_updates.clear();
    }

    let context = &node.memoized_state;
    let normal = fire_effects(&mut queue.effects, context);
    let captured = fire_effects(&mut queue.captured_effects, context);
    normal.and(captured)
}

fn fire_effects<S: NodeState>(chain: &mut Chain<S>, context: &S) -> Result<(), CallbackError> {
    let mut cursor = chain.first.take();
    chain.last = None;

    let mut result = Ok(());
    while let Some(effect) = cursor {
        cursor = effect.next_effect();
        if let Some(callback) = effect.take_callback() {
            if let Err(err) = callback(context) {
                result = result.and(Err(err));
            }
        }
    }
    result
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{NodeKind, RootId};
    use std::cell::RefCell;

    /// Text state; a patch is the complete new text
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    struct Text(String);

    impl NodeState for Text {
        type Partial = String;
        type Inputs = ();

        fn merge(&self, partial: &String) -> Self {
            Text(partial.clone())
        }
    }

    fn push(letter: &'static str) -> UpdateAction<Text> {
        UpdateAction::Set(Patch::compute(move |prev: &Text, _| {
            Ok(Some(format!("{}{}", prev.0, letter)))
        }))
    }

    fn single_node() -> (NodeArena<Text>, NodeId) {
        let mut arena = NodeArena::new();
        let id = arena.next_id();
        arena.insert(Node::new(id, NodeKind::Stateful, RootId::from_index(0), Text::default()));
        (arena, id)
    }

    fn process(arena: &mut NodeArena<Text>, id: NodeId, deadline: Deadline) -> ProcessOutcome {
        let node = arena.active_mut(id).expect("node");
        process_update_queue(node, &(), deadline).expect("pure updates")
    }

    fn d(raw: u32) -> Deadline {
        Deadline::from_raw(raw)
    }

    #[test]
    fn skip_and_rebase_example() {
        let (mut arena, id) = single_node();
        for (letter, priority) in [("A", 10), ("B", 20), ("C", 10), ("D", 20)] {
            enqueue_update(&mut arena, id, Update::new(d(priority), push(letter)));
        }

        let outcome = process(&mut arena, id, d(10));
        let node = arena.active(id).expect("node");
        let queue = node.queue().expect("queue");
        assert_eq!(node.state().0, "AC");
        assert_eq!(queue.base_state().0, "A");
        assert_eq!(node.pending_deadline(), d(20));
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.skipped, 2);

        // the retained list restarts at B, with C rebased after it
        let retained: Vec<_> = queue.pending_updates().map(|u| u.deadline()).collect();
        assert_eq!(retained, vec![d(20), d(10), d(20)]);

        process(&mut arena, id, d(20));
        let node = arena.active(id).expect("node");
        assert_eq!(node.state().0, "ABCD");
        assert_eq!(node.queue().map(|q| q.base_state().0.as_str()), Some("ABCD"));
        assert_eq!(node.pending_deadline(), Deadline::NO_WORK);
        assert!(node.queue().map(|q| q.first_update().is_none()).unwrap_or(false));
        assert!(node.queue().map(|q| q.last_update().is_none()).unwrap_or(false));
    }

    #[test]
    fn enqueue_on_pair_reaches_both_queues_once() {
        let (mut arena, id) = single_node();
        arena.ensure_standby(id);

        for (i, letter) in ["a", "b", "c", "d"].into_iter().enumerate() {
            enqueue_update(&mut arena, id, Update::new(d(10 + i as u32), push(letter)));
        }

        let active: Vec<_> = arena.active(id).and_then(|n| n.queue()).expect("q").pending_updates().collect();
        let standby: Vec<_> = arena.standby(id).and_then(|n| n.queue()).expect("q").pending_updates().collect();
        assert_eq!(active.len(), 4);
        assert_eq!(standby.len(), 4);
        for (a, b) in active.iter().zip(&standby) {
            assert!(Rc::ptr_eq(a, b));
        }
    }

    #[test]
    fn enqueue_after_drained_standby_keeps_both_views() {
        let (mut arena, id) = single_node();
        arena.ensure_standby(id);
        enqueue_update(&mut arena, id, Update::new(d(10), push("a")));

        // drain the standby queue only, as a render would
        let standby = arena.standby_mut(id).expect("standby");
        process_update_queue(standby, &(), d(10)).expect("pure");
        assert!(standby.queue().map(|q| q.last_update().is_none()).unwrap_or(false));

        enqueue_update(&mut arena, id, Update::new(d(10), push("b")));

        let active: Vec<_> = arena.active(id).and_then(|n| n.queue()).expect("q").pending_updates().collect();
        let standby: Vec<_> = arena.standby(id).and_then(|n| n.queue()).expect("q").pending_updates().collect();
        assert_eq!(active.len(), 2);
        assert_eq!(standby.len(), 1);
        assert!(Rc::ptr_eq(&active[1], &standby[0]));
    }

    #[test]
    fn missing_queue_is_cloned_from_alternate() {
        let (mut arena, id) = single_node();
        enqueue_update(&mut arena, id, Update::new(d(10), push("a")));
        arena.ensure_standby(id);

        // active has a queue, standby does not yet
        enqueue_update(&mut arena, id, Update::new(d(10), push("b")));

        let active_len = arena.active(id).and_then(|n| n.queue()).map(|q| q.pending_updates().count());
        let standby_len = arena.standby(id).and_then(|n| n.queue()).map(|q| q.pending_updates().count());
        assert_eq!(active_len, Some(2));
        assert_eq!(standby_len, Some(1));
    }

    #[test]
    fn replace_and_force() {
        let (mut arena, id) = single_node();
        enqueue_update(&mut arena, id, Update::new(d(10), push("x")));
        enqueue_update(
            &mut arena,
            id,
            Update::new(d(10), UpdateAction::Replace(Replacement::Value(Text("fresh".into())))),
        );
        enqueue_update(&mut arena, id, Update::new(d(10), UpdateAction::Force));

        let outcome = process(&mut arena, id, d(10));
        assert!(outcome.forced_update);
        assert_eq!(arena.active(id).map(|n| n.state().0.clone()), Some("fresh".to_string()));
    }

    #[test]
    fn patch_returning_none_is_noop() {
        let (mut arena, id) = single_node();
        enqueue_update(&mut arena, id, Update::new(d(10), push("k")));
        enqueue_update(
            &mut arena,
            id,
            Update::new(d(10), UpdateAction::Set(Patch::compute(|_: &Text, _| Ok(None)))),
        );

        process(&mut arena, id, d(10));
        assert_eq!(arena.active(id).map(|n| n.state().0.clone()), Some("k".to_string()));
    }

    #[test]
    fn capture_flips_flags() {
        let (mut arena, id) = single_node();
        if let Some(node) = arena.active_mut(id) {
            node.effect_flags = EffectFlags::SHOULD_CAPTURE;
        }
        enqueue_update(
            &mut arena,
            id,
            Update::new(d(10), UpdateAction::Capture(Patch::Value("recovered".into()))),
        );

        process(&mut arena, id, d(10));
        let flags = arena.active(id).map(Node::effect_flags).expect("node");
        assert!(flags.contains(EffectFlags::DID_CAPTURE));
        assert!(!flags.contains(EffectFlags::SHOULD_CAPTURE));
    }

    #[test]
    fn failing_update_leaves_queue_untouched() {
        let (mut arena, id) = single_node();
        enqueue_update(&mut arena, id, Update::new(d(10), push("a")));
        enqueue_update(
            &mut arena,
            id,
            Update::new(
                d(10),
                UpdateAction::Set(Patch::compute(|_: &Text, _| Err(UpdateError::new("bad payload")))),
            ),
        );

        let node = arena.active_mut(id).expect("node");
        let err = process_update_queue(node, &(), d(10)).expect_err("payload fails");
        assert_eq!(err.message(), "bad payload");

        let node = arena.active(id).expect("node");
        assert_eq!(node.state().0, "");
        let queue = node.queue().expect("queue");
        assert_eq!(queue.base_state().0, "");
        assert_eq!(queue.pending_updates().count(), 2);
        assert!(!queue.has_pending_effects());
    }

    #[test]
    fn callbacks_fire_once_in_order() {
        let (mut arena, id) = single_node();
        let log = Rc::new(RefCell::new(Vec::new()));

        for letter in ["a", "b", "c"] {
            let log = log.clone();
            enqueue_update(
                &mut arena,
                id,
                Update::with_callback(
                    d(10),
                    push(letter),
                    Box::new(move |state: &Text| {
                        log.borrow_mut().push(format!("{letter}:{}", state.0));
                        Ok(())
                    }),
                ),
            );
        }

        process(&mut arena, id, d(10));
        let node = arena.active_mut(id).expect("node");
        assert!(node.effect_flags().contains(EffectFlags::CALLBACK));
        commit_update_queue(node).expect("callbacks succeed");
        commit_update_queue(node).expect("second commit is empty");

        assert_eq!(*log.borrow(), vec!["a:abc", "b:abc", "c:abc"]);
    }

    #[test]
    fn skipped_updates_do_not_fire_callbacks() {
        let (mut arena, id) = single_node();
        let fired = Rc::new(RefCell::new(0));
        let counter = fired.clone();
        enqueue_update(
            &mut arena,
            id,
            Update::with_callback(
                d(50),
                push("late"),
                Box::new(move |_: &Text| {
                    *counter.borrow_mut() += 1;
                    Ok(())
                }),
            ),
        );

        process(&mut arena, id, d(10));
        let node = arena.active_mut(id).expect("node");
        commit_update_queue(node).expect("nothing to fire");
        assert_eq!(*fired.borrow(), 0);

        process_update_queue(node, &(), d(50)).expect("pure");
        commit_update_queue(node).expect("fires");
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn failing_callback_does_not_stop_later_callbacks() {
        let (mut arena, id) = single_node();
        let fired = Rc::new(RefCell::new(Vec::new()));

        let log = fired.clone();
        enqueue_update(
            &mut arena,
            id,
            Update::with_callback(d(10), push("a"), Box::new(|_: &Text| Err(CallbackError::new("orphaned")))),
        );
        enqueue_update(
            &mut arena,
            id,
            Update::with_callback(
                d(10),
                push("b"),
                Box::new(move |_: &Text| {
                    log.borrow_mut().push("b");
                    Ok(())
                }),
            ),
        );

        process(&mut arena, id, d(10));
        let node = arena.active_mut(id).expect("node");
        let err = commit_update_queue(node).expect_err("first callback fails");
        assert_eq!(err.message(), "orphaned");
        assert_eq!(*fired.borrow(), vec!["b"]);

        // nothing is left to fire a second time
        assert!(!node.queue().expect("queue").has_pending_effects());
        commit_update_queue(node).expect("nothing left");
        assert_eq!(*fired.borrow(), vec!["b"]);
    }

    #[test]
    fn captured_updates_are_processed_and_spliced_on_commit() {
        let (mut arena, id) = single_node();
        enqueue_update(&mut arena, id, Update::new(d(10), push("a")));
        enqueue_update(&mut arena, id, Update::new(d(30), push("z")));
        enqueue_captured_update(&mut arena, id, Update::new(d(10), push("!")));
        enqueue_captured_update(&mut arena, id, Update::new(d(30), push("?")));

        // render the standby buffer the way a flush would
        let inputs = ();
        let standby = arena.prepare_work_in_progress(id).expect("standby");
        process_update_queue(standby, &inputs, d(10)).expect("pure");
        assert_eq!(standby.state().0, "a!");
        assert_eq!(standby.pending_deadline(), d(30));
        assert!(standby.effect_flags().contains(EffectFlags::CALLBACK));
        let queue = standby.queue().expect("queue");
        assert_eq!(queue.base_state().0, "a");
        // "!" was applied on top of the skipped "z", so it replays with it
        assert_eq!(queue.pending_captured_updates().count(), 2);

        commit_update_queue(standby).expect("no callbacks");
        let queue = standby.queue().expect("queue");
        assert!(queue.first_captured_update().is_none());
        // normal list now ends with the captured updates
        let tail: Vec<_> = queue.pending_updates().map(|u| u.deadline()).collect();
        assert_eq!(tail, vec![d(30), d(10), d(30)]);

        process_update_queue(standby, &inputs, d(30)).expect("pure");
        assert_eq!(standby.state().0, "az!?");
    }

    /// Render, swap and commit the way a flush does.
    fn flush(arena: &mut NodeArena<Text>, id: NodeId, deadline: Deadline) {
        let standby = arena.prepare_work_in_progress(id).expect("standby");
        process_update_queue(standby, &(), deadline).expect("pure");
        arena.swap(id);
        commit_update_queue(arena.active_mut(id).expect("node")).expect("no callbacks");
    }

    #[test]
    fn enqueue_after_captured_splice_keeps_captured_updates() {
        let (mut arena, id) = single_node();
        enqueue_update(&mut arena, id, Update::new(d(10), push("a")));
        enqueue_update(&mut arena, id, Update::new(d(20), push("z")));
        enqueue_captured_update(&mut arena, id, Update::new(d(20), push("!")));

        // "z" and "!" are both left behind; commit links "!" after "z"
        flush(&mut arena, id, d(10));
        let pending: Vec<_> = arena
            .active(id)
            .and_then(Node::queue)
            .expect("queue")
            .pending_updates()
            .map(|u| u.deadline())
            .collect();
        assert_eq!(pending, vec![d(20), d(20)]);

        // the swapped-out queue still ends at "z"; appending must not cut "!" off
        enqueue_update(&mut arena, id, Update::new(d(20), push("n")));
        flush(&mut arena, id, d(20));

        let node = arena.active(id).expect("node");
        assert_eq!(node.state().0, "az!n");
        assert_eq!(node.pending_deadline(), Deadline::NO_WORK);
    }

    #[test]
    fn skipped_captured_update_survives_a_drained_pass() {
        let (mut arena, id) = single_node();
        enqueue_update(&mut arena, id, Update::new(d(10), push("a")));
        enqueue_captured_update(&mut arena, id, Update::new(d(20), push("!")));

        flush(&mut arena, id, d(10));
        let node = arena.active(id).expect("node");
        assert_eq!(node.state().0, "a");
        assert_eq!(node.pending_deadline(), d(20));
        assert_eq!(node.queue().expect("queue").pending_updates().count(), 1);

        flush(&mut arena, id, d(20));
        let node = arena.active(id).expect("node");
        assert_eq!(node.state().0, "a!");
        assert_eq!(node.pending_deadline(), Deadline::NO_WORK);
    }

    #[test]
    fn tags_match_actions() {
        assert_eq!(push("a").tag(), UpdateTag::Set);
        assert_eq!(UpdateAction::<Text>::Force.tag(), UpdateTag::Force);
        assert_eq!(
            UpdateAction::Capture(Patch::<Text>::Value(String::new())).tag(),
            UpdateTag::Capture
        );
    }
}
