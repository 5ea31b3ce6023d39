// ============================================================================
// spark-scheduler - Deadlines
// Comparable priority values and bucketed expiration arithmetic
// ============================================================================
//
// A deadline is a point in "deadline space": wall-clock milliseconds scaled
// down to UNIT_SIZE_MS units and shifted past two sentinels. Lower values are
// more urgent. The sentinels:
//
//   NO_WORK (0)  - nothing pending; never takes part in urgency comparisons
//   SYNC    (1)  - must be applied before control returns to the caller
//   NEVER   (max)- offscreen / idle work, later than every real deadline
//
// Bucketing rounds an expiration up to a bucket boundary so that updates
// arriving close together share a deadline and get flushed together.
// ============================================================================

use std::fmt;

use super::constants::{MAGIC_NUMBER_OFFSET, UNIT_SIZE_MS};

/// Largest value that fits a signed 31-bit integer
const MAX_SIGNED_31_BIT_INT: u32 = 1_073_741_823;

// =============================================================================
// DEADLINE
// =============================================================================

/// A comparable scheduling deadline. Lower values are more urgent.
///
/// `Deadline` deliberately does not implement `Ord`: `NO_WORK` is numerically
/// the smallest value but means "nothing pending", so every comparison goes
/// through a method that knows about the sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Deadline(u32);

impl Deadline {
    /// No pending work
    pub const NO_WORK: Self = Self(0);

    /// Highest urgency
    pub const SYNC: Self = Self(1);

    /// Offscreen / idle work
    pub const NEVER: Self = Self(MAX_SIGNED_31_BIT_INT);

    /// Wrap a raw deadline value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Convert elapsed milliseconds into deadline space.
    pub fn from_ms(ms: u64) -> Self {
        let units = ms / UNIT_SIZE_MS + u64::from(MAGIC_NUMBER_OFFSET);
        Self(clamp_real(units))
    }

    /// Convert back to milliseconds (inverse of [`Deadline::from_ms`] up to
    /// unit precision).
    pub fn to_ms(self) -> u64 {
        u64::from(self.0.saturating_sub(MAGIC_NUMBER_OFFSET)) * UNIT_SIZE_MS
    }

    /// Check for the `NO_WORK` sentinel
    pub const fn is_no_work(self) -> bool {
        self.0 == Self::NO_WORK.0
    }

    /// Check for the `SYNC` sentinel
    pub const fn is_sync(self) -> bool {
        self.0 == Self::SYNC.0
    }

    /// Check for the `NEVER` sentinel
    pub const fn is_never(self) -> bool {
        self.0 == Self::NEVER.0
    }

    /// Whether work due at `self` is included in a pass rendering up to
    /// `limit`.
    ///
    /// `NO_WORK` is never within any limit.
    pub const fn is_within(self, limit: Self) -> bool {
        !self.is_no_work() && self.0 <= limit.0
    }

    /// Strict urgency comparison between two real deadlines.
    pub const fn is_more_urgent_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// The more urgent of two deadlines, treating `NO_WORK` as "absent".
    pub fn earliest(self, other: Self) -> Self {
        match (self.is_no_work(), other.is_no_work()) {
            (true, _) => other,
            (_, true) => self,
            _ if other.0 < self.0 => other,
            _ => self,
        }
    }

    /// The less urgent of two deadlines, treating `NO_WORK` as "absent".
    pub fn latest(self, other: Self) -> Self {
        match (self.is_no_work(), other.is_no_work()) {
            (true, _) => other,
            (_, true) => self,
            _ if other.0 > self.0 => other,
            _ => self,
        }
    }

    /// The next deadline strictly less urgent than this one.
    pub fn next_later(self) -> Self {
        Self(clamp_real(u64::from(self.0) + 1))
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NO_WORK => f.write_str("no-work"),
            Self::SYNC => f.write_str("sync"),
            Self::NEVER => f.write_str("never"),
            Self(raw) => write!(f, "t{raw}"),
        }
    }
}

/// Real deadlines stay strictly between SYNC and NEVER.
fn clamp_real(units: u64) -> u32 {
    let max = u64::from(MAX_SIGNED_31_BIT_INT - 1);
    units.clamp(u64::from(MAGIC_NUMBER_OFFSET), max) as u32
}

// =============================================================================
// BUCKETING
// =============================================================================

/// Round `num` up to the next multiple of `precision` (always advancing by at
/// least one step, so exact multiples move to the following bucket).
fn ceiling(num: u64, precision: u64) -> u64 {
    (num / precision + 1) * precision
}

/// Compute a bucketed deadline `expiration_ms` after `current_time`.
///
/// All times within one `bucket_size_ms` window map to the same deadline.
pub fn compute_expiration_bucket(
    current_time: Deadline,
    expiration_ms: u64,
    bucket_size_ms: u64,
) -> Deadline {
    let offset = u64::from(MAGIC_NUMBER_OFFSET);
    let current = u64::from(current_time.raw()).saturating_sub(offset);
    let precision = (bucket_size_ms / UNIT_SIZE_MS).max(1);
    let units = offset + ceiling(current + expiration_ms / UNIT_SIZE_MS, precision);
    Deadline(clamp_real(units))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_ordered() {
        assert!(Deadline::SYNC.is_more_urgent_than(Deadline::from_ms(0)));
        assert!(Deadline::from_ms(1_000_000).is_more_urgent_than(Deadline::NEVER));
        assert!(Deadline::NO_WORK.is_no_work());
        assert_eq!(Deadline::default(), Deadline::NO_WORK);
    }

    #[test]
    fn no_work_is_never_within() {
        assert!(!Deadline::NO_WORK.is_within(Deadline::NEVER));
        assert!(Deadline::SYNC.is_within(Deadline::SYNC));
        assert!(Deadline::SYNC.is_within(Deadline::NEVER));
        assert!(!Deadline::NEVER.is_within(Deadline::SYNC));
    }

    #[test]
    fn earliest_ignores_no_work() {
        let a = Deadline::from_raw(40);
        let b = Deadline::from_raw(30);

        assert_eq!(a.earliest(b), b);
        assert_eq!(b.earliest(a), b);
        assert_eq!(Deadline::NO_WORK.earliest(a), a);
        assert_eq!(a.earliest(Deadline::NO_WORK), a);
        assert_eq!(Deadline::NO_WORK.earliest(Deadline::NO_WORK), Deadline::NO_WORK);
    }

    #[test]
    fn latest_ignores_no_work() {
        let a = Deadline::from_raw(40);
        let b = Deadline::from_raw(30);

        assert_eq!(a.latest(b), a);
        assert_eq!(Deadline::NO_WORK.latest(b), b);
        assert_eq!(b.latest(Deadline::NO_WORK), b);
    }

    #[test]
    fn ms_round_trip_keeps_unit_precision() {
        assert_eq!(Deadline::from_ms(0).raw(), 2);
        assert_eq!(Deadline::from_ms(99).raw(), 11);
        assert_eq!(Deadline::from_ms(1230).to_ms(), 1230);
    }

    #[test]
    fn bucket_groups_nearby_times() {
        let a = compute_expiration_bucket(Deadline::from_ms(1000), 5000, 250);
        let b = compute_expiration_bucket(Deadline::from_ms(1090), 5000, 250);
        assert_eq!(a, b);

        let c = compute_expiration_bucket(Deadline::from_ms(1300), 5000, 250);
        assert!(a.is_more_urgent_than(c));
    }

    #[test]
    fn bucket_is_later_than_current_time() {
        let now = Deadline::from_ms(2000);
        let d = compute_expiration_bucket(now, 150, 100);
        assert!(now.is_more_urgent_than(d));
        assert!(d.is_more_urgent_than(Deadline::NEVER));
    }

    #[test]
    fn next_later_is_strictly_later() {
        let d = Deadline::from_raw(500);
        assert!(d.is_more_urgent_than(d.next_later()));
        assert_eq!(Deadline::from_raw(1_073_741_822).next_later().raw(), 1_073_741_822);
    }

    #[test]
    fn display_names_sentinels() {
        assert_eq!(Deadline::NO_WORK.to_string(), "no-work");
        assert_eq!(Deadline::SYNC.to_string(), "sync");
        assert_eq!(Deadline::NEVER.to_string(), "never");
        assert_eq!(Deadline::from_raw(42).to_string(), "t42");
    }
}
