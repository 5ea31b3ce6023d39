// ============================================================================
// spark-scheduler - Primitives Module
// Caller-facing handles: batches and work completion signals
// ============================================================================

pub mod batch;
pub mod work;

// Re-export for convenience
pub use batch::Batch;
pub use work::{WorkCallback, WorkHandle};
