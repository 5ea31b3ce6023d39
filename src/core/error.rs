// ============================================================================
// spark-scheduler - Errors
// ============================================================================
//
// The scheduler never recovers from a failing user function on its own: a
// failed update aborts the pass and surfaces here, leaving queues as they
// were so the caller can retry at another deadline.
// ============================================================================

use thiserror::Error;

use super::deadline::Deadline;
use super::types::{BatchId, NodeId, RootId};

/// Failure raised by an update payload function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpdateError {
    message: String,
}

impl UpdateError {
    /// Create an error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure raised by a completion callback, typically because whatever it
/// reports to no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Create an error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure reported by the host while applying rendered work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    /// Create an error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// An update payload function failed while rendering a node.
    #[error("update on {node} failed while rendering at {deadline}: {source}")]
    UpdateFailed {
        node: NodeId,
        deadline: Deadline,
        #[source]
        source: UpdateError,
    },

    /// A completion callback failed during commit.
    #[error("completion callback on {node} failed: {source}")]
    CallbackFailed {
        node: NodeId,
        #[source]
        source: CallbackError,
    },

    /// The host rejected the rendered work.
    #[error("host failed to apply {root} at {deadline}: {source}")]
    Host {
        root: RootId,
        deadline: Deadline,
        #[source]
        source: HostError,
    },

    /// A flush was requested while another flush was rendering.
    #[error("cannot flush {0} while a render is in progress")]
    ReentrantFlush(RootId),

    /// The root handle does not refer to a mounted root.
    #[error("{0} is not mounted")]
    UnknownRoot(RootId),

    /// The node handle does not refer to a live node.
    #[error("{0} does not exist")]
    UnknownNode(NodeId),

    /// Updates were sent to a node kind that holds no state.
    #[error("{0} cannot hold state")]
    NotStateful(NodeId),

    /// The batch handle does not refer to a live batch.
    #[error("{0} does not exist")]
    UnknownBatch(BatchId),
}

/// Result alias for scheduler operations
pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
