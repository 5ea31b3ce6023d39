// ============================================================================
// spark-scheduler - Constants
// Effect flags, scheduling modes and deadline bucket defaults
// ============================================================================

use bitflags::bitflags;

// =============================================================================
// EFFECT FLAGS
// =============================================================================

bitflags! {
    /// Side-effect flags recorded on a node while its queue is processed.
    ///
    /// The committer reads these to decide which follow-up work a node needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectFlags: u32 {
        /// Node has no pending side effects
        const NONE = 0;
        /// Node committed new state this pass
        const UPDATE = 1 << 2;
        /// At least one applied update carries a completion callback
        const CALLBACK = 1 << 5;
        /// Node was asked to recover from a failure in its subtree
        const SHOULD_CAPTURE = 1 << 10;
        /// Node has processed its capture update
        const DID_CAPTURE = 1 << 6;
    }
}

// =============================================================================
// SCHEDULE MODE
// =============================================================================

bitflags! {
    /// How updates against a node are timed.
    ///
    /// Nodes without `ASYNC` receive synchronous deadlines and flush
    /// immediately outside of a batching scope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScheduleMode: u8 {
        /// Synchronous (legacy) scheduling
        const SYNC = 0;
        /// Updates receive bucketed, deferrable deadlines
        const ASYNC = 1 << 0;
    }
}

// =============================================================================
// DEADLINE UNITS
// =============================================================================

/// Milliseconds represented by one deadline unit
pub const UNIT_SIZE_MS: u64 = 10;

/// Offset keeping real deadlines clear of the `NO_WORK` and `SYNC` sentinels
pub const MAGIC_NUMBER_OFFSET: u32 = 2;

/// Default expiration window for async (throughput-biased) updates
pub const LOW_PRIORITY_EXPIRATION_MS: u64 = 5000;

/// Default bucket width for async updates
pub const LOW_PRIORITY_BATCH_SIZE_MS: u64 = 250;

/// Default expiration window for interactive (latency-biased) updates
pub const HIGH_PRIORITY_EXPIRATION_MS: u64 = 150;

/// Default bucket width for interactive updates
pub const HIGH_PRIORITY_BATCH_SIZE_MS: u64 = 100;

// =============================================================================
// TESTS
// =============================================================================
