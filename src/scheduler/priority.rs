// ============================================================================
// spark-scheduler - Priority
// Reading the clock and choosing a deadline for each new update
// ============================================================================
//
// Two rules keep deadlines stable:
//
// - The scheduler time is a cached clock reading. It is refreshed only when
//   nothing is pending, so every update produced by one logical event sees
//   the same "now" and lands in the same bucket.
// - Updates produced while a pass is running inherit the pass: render-phase
//   updates get the render deadline, commit-phase updates get SYNC.
// ============================================================================

use tracing::trace;

use crate::core::constants::ScheduleMode;
use crate::core::deadline::Deadline;
use crate::core::types::{NodeId, NodeState};

use super::engine::Scheduler;
use super::host::Host;
use super::registry::find_highest_priority_root;

impl<S: NodeState, H: Host<S>> Scheduler<S, H> {
    /// The current time in deadline space.
    ///
    /// Returns the cached scheduler time while a pass is rendering or while
    /// any root has real pending work; otherwise re-reads the clock first.
    pub fn request_current_time(&mut self) -> Deadline {
        if self.state.is_rendering {
            return self.state.current_scheduler_time;
        }

        find_highest_priority_root(&mut self.state, &mut self.roots);
        let pending = self.state.next_flushed_deadline;
        if pending.is_no_work() || pending.is_never() {
            self.recompute_renderer_time();
            self.state.current_scheduler_time = self.state.current_renderer_time;
        }
        self.state.current_scheduler_time
    }

    /// Deadline for a new update against `node`, computed at `current_time`.
    pub fn compute_expiration_for_node(&mut self, current_time: Deadline, node: NodeId) -> Deadline {
        let state = &self.state;
        let deadline = if !state.expiration_context.is_no_work() {
            state.expiration_context
        } else if state.is_working {
            if state.is_committing {
                Deadline::SYNC
            } else {
                state.next_render_deadline
            }
        } else if self.is_async(node) {
            let deadline = if state.is_batching_interactive {
                self.config.interactive_deadline(current_time)
            } else {
                self.config.async_deadline(current_time)
            };
            // never land in the bucket being rendered
            if state.next_root.is_some() && deadline == state.next_render_deadline {
                deadline.next_later()
            } else {
                deadline
            }
        } else {
            Deadline::SYNC
        };

        if self.state.is_batching_interactive {
            self.state.lowest_pending_interactive =
                self.state.lowest_pending_interactive.latest(deadline);
        }

        trace!(node = %node, now = %current_time, %deadline, "computed deadline");
        deadline
    }

    /// A fresh async deadline strictly later than the last one handed out.
    ///
    /// Batches use this so that no two of them ever share a deadline.
    pub fn compute_unique_async_deadline(&mut self) -> Deadline {
        let current_time = self.request_current_time();
        let mut deadline = self.config.async_deadline(current_time);
        let last = self.state.last_unique_async;
        if !last.is_no_work() && !last.is_more_urgent_than(deadline) {
            deadline = last.next_later();
        }
        self.state.last_unique_async = deadline;
        deadline
    }

    /// Async deadline for the current time, ignoring every override.
    pub fn compute_async_deadline(&mut self) -> Deadline {
        let current_time = self.request_current_time();
        self.config.async_deadline(current_time)
    }

    fn is_async(&self, node: NodeId) -> bool {
        self.nodes
            .active(node)
            .is_some_and(|n| self.host.schedule_mode(n).contains(ScheduleMode::ASYNC))
    }
}

// =============================================================================
// TESTS
// =============================================================================
