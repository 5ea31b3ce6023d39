// ============================================================================
// spark-scheduler - Flush Engine
// Render, complete and commit roots in deadline order
// ============================================================================
//
// A flush pass over one root has three phases:
//
//   render    every member node due by the pass deadline gets a fresh standby
//             buffer and has its queue processed into it
//   complete  the first batch of the root may hold the result back; if so the
//             finished work is parked on the root until the batch commits
//   commit    the host applies the finished work, buffers swap, completion
//             callbacks fire, and the root's pending deadline is recomputed
//
// A render or host error aborts the pass before anything swaps. A failing
// callback is reported after every node of the root has committed.
//
// Follow-up updates pushed through `FollowUps` are submitted at the end of
// the render phase, during commit, and after the pass, each at the priority
// that phase implies.
// ============================================================================

use std::rc::Rc;

use tracing::{debug, debug_span, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::constants::EffectFlags;
use crate::core::context::SchedulerState;
use crate::core::deadline::Deadline;
use crate::core::error::{Result, SchedulerError};
use crate::core::types::{NodeState, RootId};
use crate::fiber::node::NodeArena;
use crate::fiber::update_queue::{commit_update_queue, process_update_queue};
use crate::primitives::batch::BatchTable;

use super::config::SchedulerConfig;
use super::follow_up::FollowUps;
use super::host::{FinishedWork, Host, NoopHost, RenderedNode};
use super::registry::{add_root_to_schedule, find_highest_priority_root};
use super::root::RootTable;

// =============================================================================
// SCHEDULER
// =============================================================================

/// Owner of every root, node, batch and the shared scheduling state.
///
/// All mutation goes through `&mut self`, so a flush can never be entered
/// from inside another flush.
///
/// # Example
///
/// ```
/// use spark_scheduler::{NoopHost, ScheduleMode, Scheduler};
/// use std::collections::BTreeMap;
///
/// let mut scheduler = Scheduler::new(NoopHost);
/// let root = scheduler.create_root(BTreeMap::new(), ScheduleMode::SYNC);
///
/// // sync roots flush before `render` returns
/// let work = scheduler
///     .render(root, BTreeMap::from([("title", "hello")]))
///     .unwrap();
/// assert!(work.is_committed());
///
/// let node = scheduler.root_node(root).unwrap();
/// assert_eq!(scheduler.state_of(node).unwrap().get("title"), Some(&"hello"));
/// ```
pub struct Scheduler<S: NodeState, H: Host<S> = NoopHost> {
    pub(crate) state: SchedulerState,
    pub(crate) config: SchedulerConfig,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) host: H,
    pub(crate) nodes: NodeArena<S>,
    pub(crate) roots: RootTable<S>,
    pub(crate) batches: BatchTable<S>,
    pub(crate) follow_ups: FollowUps<S>,
}

impl<S: NodeState, H: Host<S>> Scheduler<S, H> {
    /// Create a scheduler reading wall-clock time.
    pub fn new(host: H) -> Self {
        Self::with_clock(host, SystemClock::new())
    }

    /// Create a scheduler reading time from `clock`.
    pub fn with_clock(host: H, clock: impl Clock) -> Self {
        let start = Deadline::from_ms(clock.elapsed_ms());
        Self {
            state: SchedulerState::new(start),
            config: SchedulerConfig::default(),
            clock: Box::new(clock),
            host,
            nodes: NodeArena::new(),
            roots: RootTable::new(),
            batches: BatchTable::new(),
            follow_ups: FollowUps::new(),
        }
    }

    /// Replace the expiration windows.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shared scheduling state (phase flags, cached time, registry head)
    pub fn scheduling_state(&self) -> &SchedulerState {
        &self.state
    }

    /// The host
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    // =========================================================================
    // FLUSH ENTRY POINTS
    // =========================================================================

    /// Flush roots in priority order while the most urgent one is due by
    /// `limit`.
    pub fn perform_work(&mut self, limit: Deadline) -> Result<()> {
        let span = debug_span!("perform_work", %limit);
        let _enter = span.enter();

        find_highest_priority_root(&mut self.state, &mut self.roots);
        while let Some(root) = self.state.next_flushed_root {
            let deadline = self.state.next_flushed_deadline;
            if !deadline.is_within(limit) {
                break;
            }
            self.perform_work_on_root(root, deadline)?;
            find_highest_priority_root(&mut self.state, &mut self.roots);
        }
        Ok(())
    }

    /// Flush all synchronous work.
    pub fn flush_sync(&mut self) -> Result<()> {
        self.perform_work(Deadline::SYNC)
    }

    /// Re-read the clock and flush every root whose deadline has passed.
    pub fn flush_expired(&mut self) -> Result<()> {
        self.recompute_renderer_time();
        self.state.current_scheduler_time = self.state.current_renderer_time;
        self.perform_work(self.state.current_renderer_time)
    }

    /// Flush everything, including `NEVER` work.
    pub fn flush_all(&mut self) -> Result<()> {
        self.perform_work(Deadline::NEVER)
    }

    /// Flush one root up to `deadline`, then any synchronous work left.
    ///
    /// Parked work from a deferred batch is committed instead of rendering
    /// again.
    pub fn flush_root(&mut self, root: RootId, deadline: Deadline) -> Result<()> {
        if self.state.is_rendering {
            return Err(SchedulerError::ReentrantFlush(root));
        }
        if self.roots.get(root).is_none() {
            return Err(SchedulerError::UnknownRoot(root));
        }
        self.state.next_flushed_root = Some(root);
        self.state.next_flushed_deadline = deadline;
        self.perform_work_on_root(root, deadline)?;
        self.flush_sync()
    }

    /// Flush all interactive work handed out since the last interactive
    /// flush, as one pass.
    pub fn flush_interactive_updates(&mut self) -> Result<()> {
        if self.state.is_rendering || self.state.lowest_pending_interactive.is_no_work() {
            return Ok(());
        }
        let limit = std::mem::replace(&mut self.state.lowest_pending_interactive, Deadline::NO_WORK);
        self.perform_work(limit)
    }

    // =========================================================================
    // ROOT PASS
    // =========================================================================

    pub(crate) fn perform_work_on_root(&mut self, root: RootId, deadline: Deadline) -> Result<()> {
        let span = debug_span!("perform_work_on_root", %root, %deadline);
        let _enter = span.enter();

        let parked = self
            .roots
            .get_mut(root)
            .ok_or(SchedulerError::UnknownRoot(root))?
            .finished_work
            .take();

        self.state.is_rendering = true;
        let result = match parked {
            Some(finished) => self.complete_root(root, finished, deadline),
            None => self
                .render_root(root, deadline)
                .and_then(|finished| self.complete_root(root, finished, deadline)),
        };
        self.state.is_rendering = false;

        if let Err(err) = &result {
            warn!(%root, %deadline, error = %err, "flush aborted");
            self.state.finish_pass();
            self.refresh_root_deadline(root);
            return result;
        }
        // follow-ups pushed outside the render and commit phases
        self.submit_follow_ups()
    }

    fn render_root(&mut self, root: RootId, deadline: Deadline) -> Result<FinishedWork<S>> {
        let members = self
            .roots
            .get(root)
            .map(|slot| slot.members.clone())
            .ok_or(SchedulerError::UnknownRoot(root))?;

        self.state.is_working = true;
        self.state.next_root = Some(root);
        self.state.next_render_deadline = deadline;

        let mut rendered = Vec::new();
        for id in members {
            let due = self
                .nodes
                .active(id)
                .is_some_and(|node| node.pending_deadline().is_within(deadline));
            if !due {
                continue;
            }

            let Some(work_in_progress) = self.nodes.prepare_work_in_progress(id) else {
                continue;
            };
            let inputs = Rc::clone(&work_in_progress.inputs);
            let outcome = process_update_queue(work_in_progress, &inputs, deadline)
                .map_err(|source| SchedulerError::UpdateFailed {
                    node: id,
                    deadline,
                    source,
                })?;
            if outcome.applied > 0 {
                work_in_progress.effect_flags |= EffectFlags::UPDATE;
            }

            rendered.push(RenderedNode {
                node: id,
                state: work_in_progress.memoized_state.clone(),
                flags: work_in_progress.effect_flags,
                forced: outcome.forced_update,
            });
        }

        // render-phase follow-ups take the deadline being rendered
        self.submit_follow_ups()?;

        self.state.is_working = false;
        debug!(%root, %deadline, nodes = rendered.len(), "rendered root");
        Ok(FinishedWork {
            root,
            deadline,
            nodes: rendered,
        })
    }

    fn complete_root(&mut self, root: RootId, finished: FinishedWork<S>, deadline: Deadline) -> Result<()> {
        let first_batch = self.roots.get(root).and_then(|slot| slot.first_batch);
        if let Some(batch) = first_batch.and_then(|id| self.batches.get(id)) {
            if batch.deadline.is_within(deadline) {
                batch.completion.commit();
                if batch.defer {
                    debug!(%root, %deadline, "commit deferred by batch");
                    if let Some(slot) = self.roots.get_mut(root) {
                        slot.finished_work = Some(finished);
                        slot.deadline = Deadline::NO_WORK;
                    }
                    return Ok(());
                }
            }
        }
        self.commit_root(root, finished)
    }

    fn commit_root(&mut self, root: RootId, finished: FinishedWork<S>) -> Result<()> {
        self.state.is_working = true;
        self.state.is_committing = true;

        self.host
            .apply_at_deadline(&finished)
            .map_err(|source| SchedulerError::Host {
                root,
                deadline: finished.deadline,
                source,
            })?;

        for rendered in &finished.nodes {
            self.nodes.swap(rendered.node);
        }

        // every node commits; the first callback failure is reported
        let mut result = Ok(());
        for rendered in &finished.nodes {
            let Some(node) = self.nodes.active_mut(rendered.node) else {
                continue;
            };
            if let Err(source) = commit_update_queue(node) {
                result = result.and(Err(SchedulerError::CallbackFailed {
                    node: rendered.node,
                    source,
                }));
            }
        }
        // commit-phase follow-ups are synchronous
        let submitted = self.submit_follow_ups();

        self.state.is_committing = false;
        self.state.is_working = false;
        self.refresh_root_deadline(root);
        debug!(%root, deadline = %finished.deadline, "committed root");
        result.and(submitted)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Most urgent deadline pending on any committed member of `root`.
    pub(crate) fn root_pending_deadline(&self, root: RootId) -> Deadline {
        self.roots.get(root).map_or(Deadline::NO_WORK, |slot| {
            slot.members
                .iter()
                .filter_map(|id| self.nodes.active(*id))
                .fold(Deadline::NO_WORK, |acc, node| acc.earliest(node.pending_deadline()))
        })
    }

    /// Set the root's registry deadline from its members, scheduling it if
    /// work remains.
    pub(crate) fn refresh_root_deadline(&mut self, root: RootId) {
        let pending = self.root_pending_deadline(root);
        let Some(slot) = self.roots.get_mut(root) else {
            return;
        };
        if slot.finished_work.is_some() {
            return;
        }
        if slot.scheduled {
            slot.deadline = pending;
        } else if !pending.is_no_work() {
            add_root_to_schedule(&mut self.state, &mut self.roots, root, pending);
        }
    }

    pub(crate) fn recompute_renderer_time(&mut self) {
        self.state.current_renderer_time = Deadline::from_ms(self.clock.elapsed_ms());
    }
}

// =============================================================================
// TESTS
// =============================================================================
