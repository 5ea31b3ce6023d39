// ============================================================================
// spark-scheduler - A Deadline-Driven Incremental Update Scheduler
// ============================================================================
//
// Callers submit state updates against the nodes of mounted trees. Every
// update gets a deadline; the scheduler decides which updates to apply, in
// what order, and when to flush a consistent result to the host.
//
//   core        deadlines, clocks, errors, handles, shared state
//   fiber       double-buffered nodes and persistent update queues
//   scheduler   root registry, priority rules, flush engine, host trait
//   primitives  batches and work completion handles
// ============================================================================

pub mod core;
pub mod fiber;
pub mod primitives;
pub mod scheduler;

// Re-export core items at crate root for ergonomic access
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::constants::{self, EffectFlags, ScheduleMode};
pub use crate::core::context::SchedulerState;
pub use crate::core::deadline::{compute_expiration_bucket, Deadline};
pub use crate::core::error::{CallbackError, HostError, Result, SchedulerError, UpdateError};
pub use crate::core::types::{BatchId, NodeId, NodeKind, NodeState, RootId};

// Re-export update queue types
pub use crate::fiber::node::Node;
pub use crate::fiber::update_queue::{
    Patch, ProcessOutcome, Replacement, Update, UpdateAction, UpdateCallback, UpdateQueue,
    UpdateTag,
};

// Re-export scheduler and handles
pub use crate::primitives::batch::Batch;
pub use crate::primitives::work::WorkHandle;
pub use crate::scheduler::config::SchedulerConfig;
pub use crate::scheduler::engine::Scheduler;
pub use crate::scheduler::follow_up::FollowUps;
pub use crate::scheduler::host::{FinishedWork, Host, NoopHost, RecordingHost, RenderedNode};

// =============================================================================
// TESTS
// =============================================================================
