// ============================================================================
// spark-scheduler - Scopes
// Run a closure with batching or a priority override in effect
// ============================================================================
//
// Every scope hands the closure the scheduler back, so updates submitted
// inside see the scope's settings. Scopes nest; the previous setting is
// restored on the way out.
// ============================================================================

use crate::core::deadline::Deadline;
use crate::core::error::Result;
use crate::core::types::NodeState;

use super::engine::Scheduler;
use super::host::Host;

impl<S: NodeState, H: Host<S>> Scheduler<S, H> {
    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Hold back synchronous flushes until the outermost batch ends.
    ///
    /// Without batching, every SYNC update flushes as soon as it is
    /// submitted. Inside a batch they queue up and flush together once the
    /// outermost batch returns.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_scheduler::{NoopHost, ScheduleMode, Scheduler};
    /// use std::collections::BTreeMap;
    ///
    /// let mut scheduler = Scheduler::new(NoopHost);
    /// let root = scheduler.create_root(BTreeMap::new(), ScheduleMode::SYNC);
    /// let node = scheduler.root_node(root).unwrap();
    ///
    /// scheduler
    ///     .batched_updates(|s| {
    ///         s.set_state(node, BTreeMap::from([("a", 1)])).unwrap();
    ///         s.set_state(node, BTreeMap::from([("b", 2)])).unwrap();
    ///         // nothing committed yet
    ///         assert!(s.state_of(node).unwrap().is_empty());
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(scheduler.state_of(node).unwrap().len(), 2);
    /// ```
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        self.state.enter_batch();
        let out = f(self);
        let depth = self.state.exit_batch();

        // When the outermost batch completes, flush synchronous work
        if depth == 0 && !self.state.is_rendering {
            self.flush_sync()?;
        }
        Ok(out)
    }

    /// Inside a batch, flush every update submitted by `f` right away.
    ///
    /// Outside a batch this just runs `f`.
    pub fn unbatched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if !self.state.is_batching_updates() || self.state.is_unbatching_updates {
            return f(self);
        }
        self.state.is_unbatching_updates = true;
        let out = f(self);
        self.state.is_unbatching_updates = false;
        out
    }

    /// Treat updates submitted by `f` as responses to user input.
    ///
    /// They get interactive deadlines and are batched like
    /// [`Scheduler::batched_updates`]. Interactive work left over from an
    /// earlier scope is flushed first, so two discrete events never merge.
    pub fn interactive_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        if !self.state.is_batching_updates() && !self.state.is_rendering {
            self.flush_interactive_updates()?;
        }

        let prev = self.state.set_batching_interactive(true);
        self.state.enter_batch();
        let out = f(self);
        self.state.set_batching_interactive(prev);
        let depth = self.state.exit_batch();

        if depth == 0 && !self.state.is_rendering {
            self.flush_sync()?;
        }
        Ok(out)
    }

    // =========================================================================
    // PRIORITY OVERRIDES
    // =========================================================================

    /// Give every update submitted by `f` a SYNC deadline and flush them
    /// before returning.
    pub fn sync_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        let prev = self.state.set_expiration_context(Deadline::SYNC);
        self.state.enter_batch();
        let out = f(self);
        self.state.exit_batch();
        self.state.set_expiration_context(prev);

        if !self.state.is_rendering {
            self.flush_sync()?;
        }
        Ok(out)
    }

    /// Give every update submitted by `f` an async deadline, whatever the
    /// node's mode.
    pub fn deferred_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let deadline = self.compute_async_deadline();
        self.with_priority(deadline, f)
    }

    /// Give every update submitted by `f` exactly `deadline`.
    pub fn with_priority<R>(&mut self, deadline: Deadline, f: impl FnOnce(&mut Self) -> R) -> R {
        let prev = self.state.set_expiration_context(deadline);
        let out = f(self);
        self.state.set_expiration_context(prev);
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================
