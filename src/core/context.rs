// ============================================================================
// spark-scheduler - Scheduler State
// The process-wide scheduling context, owned explicitly by a Scheduler
// ============================================================================

use super::deadline::Deadline;
use super::types::RootId;

// =============================================================================
// SCHEDULER STATE
// =============================================================================

/// All shared scheduling state: phase flags, the cached clock, priority
/// overrides and the head/tail of the root registry.
///
/// One value is owned by each [`Scheduler`](crate::Scheduler) and threaded
/// through every scheduling call. It is created at startup and reset when
/// the last root unmounts.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    // =========================================================================
    // PHASES
    // =========================================================================
    /// A flush is between render start and commit end
    pub(crate) is_working: bool,

    /// A flush is committing (applying callbacks, swapping buffers)
    pub(crate) is_committing: bool,

    /// A flush pass is running; the clock must not be re-read
    pub(crate) is_rendering: bool,

    /// Deadline of the render in progress
    pub(crate) next_render_deadline: Deadline,

    /// Root being rendered
    pub(crate) next_root: Option<RootId>,

    // =========================================================================
    // PRIORITY
    // =========================================================================
    /// Explicit deadline pinned by the caller (`NO_WORK` when absent)
    pub(crate) expiration_context: Deadline,

    /// Nesting depth of `batched_updates`
    pub(crate) batch_depth: u32,

    /// Inside `unbatched_updates`
    pub(crate) is_unbatching_updates: bool,

    /// Inside `interactive_updates`
    pub(crate) is_batching_interactive: bool,

    /// Least urgent interactive deadline handed out since the last
    /// interactive flush
    pub(crate) lowest_pending_interactive: Deadline,

    /// Last deadline returned by `compute_unique_async_deadline`
    pub(crate) last_unique_async: Deadline,

    // =========================================================================
    // CLOCK
    // =========================================================================
    /// Freshest clock reading, in deadline space
    pub(crate) current_renderer_time: Deadline,

    /// Clock reading handed to callers; only refreshed between events
    pub(crate) current_scheduler_time: Deadline,

    // =========================================================================
    // ROOT REGISTRY
    // =========================================================================
    /// Head of the scheduled root list
    pub(crate) first_scheduled_root: Option<RootId>,

    /// Tail of the scheduled root list
    pub(crate) last_scheduled_root: Option<RootId>,

    /// Result of the last highest-priority lookup
    pub(crate) next_flushed_root: Option<RootId>,

    /// Deadline of `next_flushed_root`
    pub(crate) next_flushed_deadline: Deadline,
}

impl SchedulerState {
    /// Create a state whose clock reads `start_time`.
    pub fn new(start_time: Deadline) -> Self {
        Self {
            is_working: false,
            is_committing: false,
            is_rendering: false,
            next_render_deadline: Deadline::NO_WORK,
            next_root: None,
            expiration_context: Deadline::NO_WORK,
            batch_depth: 0,
            is_unbatching_updates: false,
            is_batching_interactive: false,
            lowest_pending_interactive: Deadline::NO_WORK,
            last_unique_async: Deadline::NO_WORK,
            current_renderer_time: start_time,
            current_scheduler_time: start_time,
            first_scheduled_root: None,
            last_scheduled_root: None,
            next_flushed_root: None,
            next_flushed_deadline: Deadline::NO_WORK,
        }
    }

    /// Return to the freshly-created state, keeping the clock readings.
    pub fn reset(&mut self) {
        let renderer = self.current_renderer_time;
        *self = Self::new(renderer);
    }

    // =========================================================================
    // PHASES
    // =========================================================================

    /// Whether a flush pass is running
    pub fn is_rendering(&self) -> bool {
        self.is_rendering
    }

    /// Whether a flush is in its render or commit phase
    pub fn is_working(&self) -> bool {
        self.is_working
    }

    /// Whether a flush is committing
    pub fn is_committing(&self) -> bool {
        self.is_committing
    }

    /// Deadline of the render in progress (`NO_WORK` when idle)
    pub fn render_deadline(&self) -> Deadline {
        self.next_render_deadline
    }

    /// Clear every phase flag after a pass finishes or aborts
    pub(crate) fn finish_pass(&mut self) {
        self.is_working = false;
        self.is_committing = false;
        self.is_rendering = false;
        self.next_render_deadline = Deadline::NO_WORK;
        self.next_root = None;
    }

    // =========================================================================
    // PRIORITY
    // =========================================================================

    /// Pin a deadline for updates computed from now on, returning the
    /// previous override
    pub fn set_expiration_context(&mut self, deadline: Deadline) -> Deadline {
        std::mem::replace(&mut self.expiration_context, deadline)
    }

    /// The pinned deadline (`NO_WORK` when none)
    pub fn expiration_context(&self) -> Deadline {
        self.expiration_context
    }

    /// Increment batch depth, returns new depth
    pub fn enter_batch(&mut self) -> u32 {
        self.batch_depth += 1;
        self.batch_depth
    }

    /// Decrement batch depth, returns new depth
    pub fn exit_batch(&mut self) -> u32 {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.batch_depth
    }

    /// Check if currently in a batching scope
    pub fn is_batching_updates(&self) -> bool {
        self.batch_depth > 0
    }

    /// Set the interactive flag, returning the previous value
    pub fn set_batching_interactive(&mut self, value: bool) -> bool {
        std::mem::replace(&mut self.is_batching_interactive, value)
    }

    /// Check if currently inside an interactive scope
    pub fn is_batching_interactive(&self) -> bool {
        self.is_batching_interactive
    }

    /// Least urgent pending interactive deadline
    pub fn lowest_pending_interactive(&self) -> Deadline {
        self.lowest_pending_interactive
    }

    // =========================================================================
    // CLOCK
    // =========================================================================

    /// Cached scheduler time
    pub fn scheduler_time(&self) -> Deadline {
        self.current_scheduler_time
    }

    /// Latest clock reading
    pub fn renderer_time(&self) -> Deadline {
        self.current_renderer_time
    }

    // =========================================================================
    // ROOT REGISTRY
    // =========================================================================

    /// Head of the scheduled root list
    pub fn first_scheduled_root(&self) -> Option<RootId> {
        self.first_scheduled_root
    }

    /// Tail of the scheduled root list
    pub fn last_scheduled_root(&self) -> Option<RootId> {
        self.last_scheduled_root
    }

    /// Root picked by the last highest-priority lookup
    pub fn next_flushed_root(&self) -> Option<RootId> {
        self.next_flushed_root
    }

    /// Deadline picked by the last highest-priority lookup
    pub fn next_flushed_deadline(&self) -> Deadline {
        self.next_flushed_deadline
    }
}

// =============================================================================
// TESTS
// =============================================================================
