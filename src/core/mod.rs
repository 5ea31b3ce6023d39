// ============================================================================
// spark-scheduler - Core Module
// Deadlines, clocks, errors, handles and the shared scheduling state
// ============================================================================

pub mod clock;
pub mod constants;
pub mod context;
pub mod deadline;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::{EffectFlags, ScheduleMode};
pub use context::SchedulerState;
pub use deadline::{compute_expiration_bucket, Deadline};
pub use error::{CallbackError, HostError, Result, SchedulerError, UpdateError};
pub use types::{BatchId, NodeId, NodeKind, NodeState, RootId};
