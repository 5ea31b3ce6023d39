// ============================================================================
// spark-scheduler - Scheduler Module
// Root registry, priority computation, flush engine and host boundary
// ============================================================================

pub mod config;
pub mod engine;
pub mod follow_up;
pub mod host;
mod priority;
mod registry;
mod root;
mod scopes;

// Re-export for convenience
pub use config::SchedulerConfig;
pub use engine::Scheduler;
pub use follow_up::FollowUps;
pub use host::{FinishedWork, Host, NoopHost, RecordingHost, RenderedNode};
