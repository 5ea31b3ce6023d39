// ============================================================================
// spark-scheduler - Host
// The boundary between the scheduler and whatever displays its results
// ============================================================================
//
// The scheduler decides what state each node should have; the host turns a
// finished render into visible side effects. It is called once per commit,
// before buffers swap, with a read-only view of everything that was rendered.
// ============================================================================

use crate::core::constants::{EffectFlags, ScheduleMode};
use crate::core::deadline::Deadline;
use crate::core::error::HostError;
use crate::core::types::{NodeId, NodeState, RootId};
use crate::fiber::node::Node;

// =============================================================================
// FINISHED WORK
// =============================================================================

/// A node produced by a render pass.
#[derive(Debug, Clone)]
pub struct RenderedNode<S> {
    /// The logical node
    pub node: NodeId,
    /// State the node will commit
    pub state: S,
    /// Effect flags collected while processing its queue
    pub flags: EffectFlags,
    /// A `Force` update was applied
    pub forced: bool,
}

/// The result of rendering a root at a deadline, waiting to be committed.
///
/// Rendered nodes are listed in tree order; the root node comes first.
#[derive(Debug, Clone)]
pub struct FinishedWork<S> {
    pub(crate) root: RootId,
    pub(crate) deadline: Deadline,
    pub(crate) nodes: Vec<RenderedNode<S>>,
}

impl<S: NodeState> FinishedWork<S> {
    /// Root that was rendered
    pub fn root(&self) -> RootId {
        self.root
    }

    /// Deadline the render ran at
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Every rendered node, in tree order
    pub fn nodes(&self) -> &[RenderedNode<S>] {
        &self.nodes
    }

    /// Rendered state of one node, if it was part of this render
    pub fn state_of(&self, node: NodeId) -> Option<&S> {
        self.nodes.iter().find(|n| n.node == node).map(|n| &n.state)
    }

    /// Whether nothing was rendered
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// =============================================================================
// HOST TRAIT
// =============================================================================

/// Collaborator that applies rendered work.
pub trait Host<S: NodeState> {
    /// Apply a finished render. An error aborts the commit; nothing swaps and
    /// no callback fires.
    fn apply_at_deadline(&mut self, work: &FinishedWork<S>) -> Result<(), HostError>;

    /// Decide how updates against `node` are timed.
    fn schedule_mode(&self, node: &Node<S>) -> ScheduleMode {
        node.mode()
    }
}

/// Host that accepts every render and does nothing with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHost;

impl<S: NodeState> Host<S> for NoopHost {
    fn apply_at_deadline(&mut self, _work: &FinishedWork<S>) -> Result<(), HostError> {
        Ok(())
    }
}

/// Host that keeps a copy of every finished render it was given.
///
/// Handy in tests and for hosts that apply work lazily.
#[derive(Debug, Clone)]
pub struct RecordingHost<S> {
    applied: Vec<FinishedWork<S>>,
}

impl<S> RecordingHost<S> {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self {
            applied: Vec::new(),
        }
    }

    /// Every render applied so far, oldest first
    pub fn applied(&self) -> &[FinishedWork<S>] {
        &self.applied
    }

    /// Drain the recorded renders
    pub fn take(&mut self) -> Vec<FinishedWork<S>> {
        std::mem::take(&mut self.applied)
    }
}

impl<S> Default for RecordingHost<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: NodeState> Host<S> for RecordingHost<S> {
    fn apply_at_deadline(&mut self, work: &FinishedWork<S>) -> Result<(), HostError> {
        self.applied.push(work.clone());
        Ok(())
    }
}
