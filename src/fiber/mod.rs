// ============================================================================
// spark-scheduler - Fiber Module
// Double-buffered nodes and their update queues
// ============================================================================

pub mod node;
pub mod update_queue;

// Re-export for convenience
pub use node::{Ancestors, BufferHandle, Node, NodeArena, NodePair};
pub use update_queue::{
    commit_update_queue, enqueue_captured_update, enqueue_update, process_update_queue,
    CapturedUpdates, ChainIter, Patch, PatchFn, ProcessOutcome, ReplaceFn, Replacement, Update,
    UpdateAction, UpdateCallback, UpdateQueue, UpdateRef, UpdateTag,
};
