// ============================================================================
// spark-scheduler - Root Registry
// Linked list of roots with pending work, ordered by arrival
// ============================================================================
//
// The list is kept in arrival order, not priority order: lookups walk the
// whole list, pick the most urgent root and prune idle roots on the way.
// With a handful of mounted roots a walk is cheaper than keeping the list
// sorted on every update.
//
//   first ─▶ root#2 ─▶ root#0 ─▶ root#5 ◀─ last
//            t40       no-work   t12
//
// A lookup over this list unlinks root#0 and picks root#5.
// ============================================================================

use tracing::{debug, trace};

use crate::core::context::SchedulerState;
use crate::core::deadline::Deadline;
use crate::core::types::{NodeState, RootId};

use super::root::RootTable;

/// Record pending work on `root`.
///
/// Unscheduled roots are appended at the tail with `deadline`. Scheduled
/// roots keep their position and only move their deadline forward when the
/// new one is more urgent.
pub(crate) fn add_root_to_schedule<S: NodeState>(
    state: &mut SchedulerState,
    roots: &mut RootTable<S>,
    root: RootId,
    deadline: Deadline,
) {
    let Some(slot) = roots.get_mut(root) else {
        return;
    };

    if !slot.scheduled {
        slot.deadline = deadline;
        slot.scheduled = true;
        slot.next_scheduled = None;

        match state.last_scheduled_root {
            None => state.first_scheduled_root = Some(root),
            Some(last) => {
                if let Some(tail) = roots.get_mut(last) {
                    tail.next_scheduled = Some(root);
                }
            }
        }
        state.last_scheduled_root = Some(root);
        trace!(%root, %deadline, "root scheduled");
        return;
    }

    let current = slot.deadline;
    if current.is_no_work() || deadline.is_more_urgent_than(current) {
        slot.deadline = deadline;
        trace!(%root, from = %current, to = %deadline, "root deadline raised");
    }
}

/// Find the most urgent scheduled root, unlinking idle roots as it goes.
///
/// The winner is stored in `next_flushed_root` / `next_flushed_deadline` of
/// the scheduler state. Ties go to the root that was scheduled first, and
/// the walk stops early at the first `SYNC` root. Calling this twice in a
/// row gives the same answer.
pub(crate) fn find_highest_priority_root<S: NodeState>(
    state: &mut SchedulerState,
    roots: &mut RootTable<S>,
) {
    let mut highest_deadline = Deadline::NO_WORK;
    let mut highest_root = None;
    let mut previous: Option<RootId> = None;
    let mut cursor = state.first_scheduled_root;

    while let Some(root) = cursor {
        let Some(slot) = roots.get(root) else {
            panic!("structural inconsistency: scheduled {root} is not mounted");
        };
        let deadline = slot.deadline;
        let next = slot.next_scheduled;

        if deadline.is_no_work() {
            unlink(state, roots, previous, root, next);
            debug!(%root, "pruned idle root from schedule");
            cursor = next;
            continue;
        }

        if highest_deadline.is_no_work() || deadline.is_more_urgent_than(highest_deadline) {
            highest_deadline = deadline;
            highest_root = Some(root);
        }
        if highest_deadline.is_sync() {
            break;
        }

        previous = Some(root);
        cursor = next;
    }

    state.next_flushed_root = highest_root;
    state.next_flushed_deadline = highest_deadline;
}

/// Unlink `root` wherever it sits in the list.
///
/// # Panics
///
/// Panics if `root` is flagged as scheduled but cannot be reached from the
/// head of the list; the registry is corrupt at that point.
pub(crate) fn remove_root_from_schedule<S: NodeState>(
    state: &mut SchedulerState,
    roots: &mut RootTable<S>,
    root: RootId,
) {
    if !roots.get(root).is_some_and(|slot| slot.scheduled) {
        return;
    }

    let mut previous = None;
    let mut cursor = state.first_scheduled_root;
    while let Some(current) = cursor {
        let next = roots.get(current).and_then(|slot| slot.next_scheduled);
        if current == root {
            unlink(state, roots, previous, root, next);
            if state.next_flushed_root == Some(root) {
                state.next_flushed_root = None;
                state.next_flushed_deadline = Deadline::NO_WORK;
            }
            debug!(%root, "removed root from schedule");
            return;
        }
        previous = Some(current);
        cursor = next;
    }

    panic!("structural inconsistency: {root} is marked scheduled but is not in the schedule");
}

/// Splice `root` out between `previous` and `next`, fixing head and tail.
fn unlink<S: NodeState>(
    state: &mut SchedulerState,
    roots: &mut RootTable<S>,
    previous: Option<RootId>,
    root: RootId,
    next: Option<RootId>,
) {
    match previous {
        None => state.first_scheduled_root = next,
        Some(prev) => {
            if let Some(slot) = roots.get_mut(prev) {
                slot.next_scheduled = next;
            }
        }
    }
    if state.last_scheduled_root == Some(root) {
        state.last_scheduled_root = previous;
    }
    if let Some(slot) = roots.get_mut(root) {
        slot.next_scheduled = None;
        slot.scheduled = false;
    }
}

/// Roots currently in the schedule, head first.
pub(crate) fn scheduled_roots<S: NodeState>(state: &SchedulerState, roots: &RootTable<S>) -> Vec<RootId> {
    let mut out = Vec::new();
    let mut cursor = state.first_scheduled_root;
    while let Some(root) = cursor {
        out.push(root);
        cursor = roots.get(root).and_then(|slot| slot.next_scheduled);
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================
