// ============================================================================
// spark-scheduler - Configuration
// Expiration windows used to turn "now" into a deadline
// ============================================================================

use crate::core::constants::{
    HIGH_PRIORITY_BATCH_SIZE_MS, HIGH_PRIORITY_EXPIRATION_MS, LOW_PRIORITY_BATCH_SIZE_MS,
    LOW_PRIORITY_EXPIRATION_MS,
};
use crate::core::deadline::{compute_expiration_bucket, Deadline};

/// Configuration for the [`Scheduler`](crate::Scheduler).
///
/// Both windows follow the same rule: an update computed at time `now`
/// expires `expiration_ms` later, rounded up to a multiple of `bucket_ms`.
/// Wider buckets batch more updates into one flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long async updates may wait
    pub async_expiration_ms: u64,
    /// Bucket width for async updates
    pub async_bucket_ms: u64,
    /// How long interactive updates may wait
    pub interactive_expiration_ms: u64,
    /// Bucket width for interactive updates
    pub interactive_bucket_ms: u64,
}

impl SchedulerConfig {
    /// Default windows: 5 s / 250 ms for async work, 150 ms / 100 ms for
    /// interactive work.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            async_expiration_ms: LOW_PRIORITY_EXPIRATION_MS,
            async_bucket_ms: LOW_PRIORITY_BATCH_SIZE_MS,
            interactive_expiration_ms: HIGH_PRIORITY_EXPIRATION_MS,
            interactive_bucket_ms: HIGH_PRIORITY_BATCH_SIZE_MS,
        }
    }

    /// Tighter windows for hosts that are mostly driven by user input.
    #[must_use]
    pub const fn interactive_heavy() -> Self {
        Self {
            async_expiration_ms: 1000,
            async_bucket_ms: 100,
            interactive_expiration_ms: 50,
            interactive_bucket_ms: 10,
        }
    }

    /// Override the async window.
    #[must_use]
    pub const fn with_async_window(mut self, expiration_ms: u64, bucket_ms: u64) -> Self {
        self.async_expiration_ms = expiration_ms;
        self.async_bucket_ms = bucket_ms;
        self
    }

    /// Override the interactive window.
    #[must_use]
    pub const fn with_interactive_window(mut self, expiration_ms: u64, bucket_ms: u64) -> Self {
        self.interactive_expiration_ms = expiration_ms;
        self.interactive_bucket_ms = bucket_ms;
        self
    }

    /// Deadline for an async update computed at `current_time`.
    pub fn async_deadline(&self, current_time: Deadline) -> Deadline {
        compute_expiration_bucket(current_time, self.async_expiration_ms, self.async_bucket_ms)
    }

    /// Deadline for an interactive update computed at `current_time`.
    pub fn interactive_deadline(&self, current_time: Deadline) -> Deadline {
        compute_expiration_bucket(
            current_time,
            self.interactive_expiration_ms,
            self.interactive_bucket_ms,
        )
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_windows() {
        let config = SchedulerConfig::default();
        let now = Deadline::from_ms(0);

        // 2 + ceiling(0 + 500, 25) = 2 + 525
        assert_eq!(config.async_deadline(now), Deadline::from_raw(527));
        // 2 + ceiling(0 + 15, 10) = 2 + 20
        assert_eq!(config.interactive_deadline(now), Deadline::from_raw(22));
    }

    #[test]
    fn interactive_is_more_urgent_than_async() {
        for config in [SchedulerConfig::standard(), SchedulerConfig::interactive_heavy()] {
            let now = Deadline::from_ms(12_340);
            assert!(config
                .interactive_deadline(now)
                .is_more_urgent_than(config.async_deadline(now)));
        }
    }

    #[test]
    fn nearby_times_share_a_bucket() {
        let config = SchedulerConfig::standard();
        let a = config.async_deadline(Deadline::from_ms(1000));
        let b = config.async_deadline(Deadline::from_ms(1100));
        assert_eq!(a, b);
    }

    #[test]
    fn builders_override_windows() {
        let config = SchedulerConfig::standard()
            .with_async_window(2000, 500)
            .with_interactive_window(30, 10);
        assert_eq!(config.async_expiration_ms, 2000);
        assert_eq!(config.async_bucket_ms, 500);
        assert_eq!(config.interactive_expiration_ms, 30);
        assert_eq!(config.interactive_bucket_ms, 10);
    }
}
