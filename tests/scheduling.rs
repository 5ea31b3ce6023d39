//! Scheduling through the public API: root registry, batches, work handles
//! and the host seam.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spark_scheduler::{
    Deadline, FinishedWork, Host, HostError, ManualClock, Node, NodeKind, NoopHost, Patch,
    RecordingHost, ScheduleMode, Scheduler, SchedulerError, UpdateAction, UpdateError,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

type State = BTreeMap<&'static str, i32>;

fn patch(key: &'static str, value: i32) -> State {
    [(key, value)].into_iter().collect()
}

// =============================================================================
// ROOT REGISTRY
// =============================================================================

#[test]
fn flushed_roots_leave_the_schedule() {
    let clock = ManualClock::new();
    let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, clock.clone());
    let a = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    let b = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    let c = scheduler.create_root(State::new(), ScheduleMode::ASYNC);

    scheduler.render(a, patch("a", 1)).expect("render");
    scheduler.render(b, patch("b", 1)).expect("render");
    scheduler.render(c, patch("c", 1)).expect("render");
    assert_eq!(scheduler.scheduled_roots(), vec![a, b, c]);

    scheduler.flush_root(b, Deadline::NEVER).expect("flush");
    scheduler.flush_sync().expect("flush");
    assert_eq!(scheduler.root_deadline(b), Some(Deadline::NO_WORK));

    scheduler.flush_all().expect("flush");
    assert!(scheduler.scheduled_roots().is_empty());
    assert_eq!(scheduler.scheduling_state().first_scheduled_root(), None);
    assert_eq!(scheduler.scheduling_state().last_scheduled_root(), None);
}

#[test]
fn unmounting_the_last_root_resets_state() {
    let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, ManualClock::new());
    let root = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    scheduler.render(root, patch("a", 1)).expect("render");

    scheduler.unmount_root(root).expect("unmount");

    assert_eq!(scheduler.root_count(), 0);
    assert!(scheduler.scheduled_roots().is_empty());
    assert!(matches!(
        scheduler.render(root, patch("a", 2)),
        Err(SchedulerError::UnknownRoot(r)) if r == root
    ));
}

#[test]
fn expired_roots_flush_by_urgency() {
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::with_clock(RecordingHost::new(), clock.clone());
    let slow = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    let fast = scheduler.create_root(State::new(), ScheduleMode::ASYNC);

    scheduler.render(slow, patch("slow", 1)).expect("render");
    scheduler
        .interactive_updates(|s| s.render(fast, patch("fast", 1)))
        .expect("scope")
        .expect("render");

    // past the interactive window, not the async one
    clock.advance(1_000);
    scheduler.flush_expired().expect("flush");

    let applied = scheduler.host_mut().take();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].root(), fast);
    assert_eq!(scheduler.scheduled_roots(), vec![slow]);

    clock.advance(10_000);
    scheduler.flush_expired().expect("flush");
    assert_eq!(scheduler.host().applied().len(), 1);
    assert_eq!(scheduler.host().applied()[0].root(), slow);
}

// =============================================================================
// WORK HANDLES
// =============================================================================

#[test]
fn work_handle_fires_subscribers_on_commit() {
    let clock = ManualClock::new();
    let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, clock.clone());
    let root = scheduler.create_root(State::new(), ScheduleMode::ASYNC);

    let work = scheduler.render(root, patch("a", 1)).expect("render");
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    work.then(move || counter.set(counter.get() + 1));
    assert_eq!(work.pending_subscribers(), 1);

    clock.advance(6_000);
    scheduler.flush_expired().expect("flush");
    assert!(work.is_committed());
    assert_eq!(fired.get(), 1);

    // late subscribers run right away
    let counter = fired.clone();
    work.then(move || counter.set(counter.get() + 1));
    assert_eq!(fired.get(), 2);
    assert_eq!(work.pending_subscribers(), 0);
}

// =============================================================================
// BATCHES
// =============================================================================

#[test]
fn committing_a_later_batch_promotes_it() {
    let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, ManualClock::new());
    let root = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    let node = scheduler.root_node(root).expect("root node");

    let first = scheduler.create_batch(root).expect("batch");
    let second = scheduler.create_batch(root).expect("batch");
    assert_eq!(scheduler.batches_of(root), vec![first, second]);

    first.render(&mut scheduler, patch("a", 1)).expect("render");
    let second_work = second.render(&mut scheduler, patch("b", 2)).expect("render");

    // promotion re-renders the children at the head's deadline
    second.commit(&mut scheduler).expect("commit");
    assert_eq!(second.deadline(&scheduler), first.deadline(&scheduler));
    assert_eq!(scheduler.state_of(node).and_then(|s| s.get("b")), Some(&2));
    assert_eq!(scheduler.batches_of(root), vec![first]);
    assert!(first.is_deferred(&scheduler));

    // the remaining batch renders but parks its commit
    scheduler.flush_all().expect("flush");
    assert!(first.is_complete(&scheduler));
    assert!(scheduler.has_parked_work(root));

    first.commit(&mut scheduler).expect("commit");
    assert!(!scheduler.has_parked_work(root));
    assert!(scheduler.batches_of(root).is_empty());

    scheduler.flush_all().expect("flush");
    assert!(scheduler.scheduled_roots().is_empty());
    assert!(second_work.is_committed());
    assert_eq!(scheduler.state_of(node), Some(&[("a", 1), ("b", 2)].into_iter().collect()));
}

#[test]
fn batch_then_runs_once_rendered() {
    let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, ManualClock::new());
    let root = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    let batch = scheduler.create_batch(root).expect("batch");

    let rendered = Rc::new(Cell::new(false));
    let flag = rendered.clone();
    batch.then(&scheduler, move || flag.set(true)).expect("then");
    batch.render(&mut scheduler, patch("a", 1)).expect("render");

    assert!(!rendered.get());
    scheduler.flush_all().expect("flush");
    assert!(rendered.get());
    assert!(batch.is_deferred(&scheduler));
}

// =============================================================================
// CAPTURED UPDATES
// =============================================================================

#[test]
fn captured_update_survives_a_later_update() {
    let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, ManualClock::new());
    let root = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    let node = scheduler.root_node(root).expect("root node");
    let (high, low) = (Deadline::from_raw(100), Deadline::from_raw(200));

    scheduler
        .with_priority(high, |s| s.set_state(node, patch("a", 1)))
        .expect("scheduled");
    scheduler
        .with_priority(low, |s| s.set_state(node, patch("z", 1)))
        .expect("scheduled");
    scheduler
        .with_priority(low, |s| s.capture_update(node, Patch::Value(patch("captured", 1))))
        .expect("captured");

    // commits `a` and splices the skipped capture onto the list
    scheduler.perform_work(high).expect("flush");
    assert_eq!(scheduler.root_deadline(root), Some(low));

    scheduler
        .with_priority(low, |s| s.set_state(node, patch("n", 1)))
        .expect("scheduled");
    scheduler.flush_all().expect("flush");

    let expected: State = [("a", 1), ("captured", 1), ("n", 1), ("z", 1)].into_iter().collect();
    assert_eq!(scheduler.state_of(node), Some(&expected));
    assert!(scheduler.scheduled_roots().is_empty());
}

#[test]
fn skipped_capture_outlives_a_drained_list() {
    let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, ManualClock::new());
    let root = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
    let node = scheduler.root_node(root).expect("root node");
    let (high, low) = (Deadline::from_raw(100), Deadline::from_raw(200));

    scheduler
        .with_priority(high, |s| s.set_state(node, patch("a", 1)))
        .expect("scheduled");
    scheduler
        .with_priority(low, |s| s.capture_update(node, Patch::Value(patch("captured", 1))))
        .expect("captured");

    scheduler.perform_work(high).expect("flush");
    assert_eq!(scheduler.state_of(node).and_then(|s| s.get("captured")), None);
    assert_eq!(scheduler.root_deadline(root), Some(low));

    scheduler.flush_all().expect("flush");
    assert_eq!(scheduler.state_of(node).and_then(|s| s.get("captured")), Some(&1));
}

// =============================================================================
// HOST
// =============================================================================

/// Host that times every node asynchronously
struct AlwaysAsync {
    applied: usize,
}

impl Host<State> for AlwaysAsync {
    fn apply_at_deadline(&mut self, _work: &FinishedWork<State>) -> Result<(), HostError> {
        self.applied += 1;
        Ok(())
    }

    fn schedule_mode(&self, _node: &Node<State>) -> ScheduleMode {
        ScheduleMode::ASYNC
    }
}

#[test]
fn host_can_override_schedule_mode() {
    let mut scheduler = Scheduler::with_clock(AlwaysAsync { applied: 0 }, ManualClock::new());
    let root = scheduler.create_root(State::new(), ScheduleMode::SYNC);
    let node = scheduler.root_node(root).expect("root node");
    let child = scheduler
        .add_node(node, NodeKind::Stateful, State::new())
        .expect("child");

    let deadline = scheduler.set_state(child, patch("a", 1)).expect("set");
    assert_eq!(deadline, Deadline::from_raw(527));
    assert_eq!(scheduler.host().applied, 0);

    scheduler.flush_all().expect("flush");
    assert_eq!(scheduler.host().applied, 1);
    assert_eq!(scheduler.state_of(child).and_then(|s| s.get("a")), Some(&1));
}

// =============================================================================
// LOGGING
// =============================================================================

/// Counts WARN events that reach it
struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn aborted_flush_is_logged_and_rescheduled() {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new("spark_scheduler=warn"))
        .with(WarnCounter(warnings.clone()));

    tracing::subscriber::with_default(subscriber, || {
        let mut scheduler: Scheduler<State> = Scheduler::with_clock(NoopHost, ManualClock::new());
        let root = scheduler.create_root(State::new(), ScheduleMode::ASYNC);
        let node = scheduler.root_node(root).expect("root node");

        scheduler
            .schedule_update(
                node,
                UpdateAction::Set(Patch::compute(|_: &State, _| Err(UpdateError::new("boom")))),
                None,
            )
            .expect("scheduled");

        let err = scheduler.flush_all().expect_err("update fails");
        assert!(matches!(err, SchedulerError::UpdateFailed { node: n, .. } if n == node));
        assert_eq!(scheduler.scheduled_roots(), vec![root]);
        assert!(!scheduler.scheduling_state().is_rendering());
    });

    assert_eq!(warnings.load(Ordering::SeqCst), 1);
}
