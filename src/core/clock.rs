// ============================================================================
// spark-scheduler - Clock
// Wall-clock sources feeding the scheduler's renderer time
// ============================================================================

use std::cell::Cell;
use std::rc::Rc;

use web_time::Instant;

// =============================================================================
// CLOCK TRAIT
// =============================================================================

/// A monotonic millisecond source.
///
/// The scheduler only ever asks for elapsed time since the clock was
/// created; absolute wall-clock values never leak into deadlines.
pub trait Clock: 'static {
    /// Milliseconds elapsed since the clock's origin.
    fn elapsed_ms(&self) -> u64;
}

// =============================================================================
// SYSTEM CLOCK
// =============================================================================

/// Clock backed by [`web_time::Instant`], so it also works on wasm targets.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

// =============================================================================
// MANUAL CLOCK
// =============================================================================

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give the
/// other to the scheduler.
///
/// # Example
///
/// ```
/// use spark_scheduler::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let handle = clock.clone();
///
/// handle.advance(250);
/// assert_eq!(clock.elapsed_ms(), 250);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    /// Jump to an absolute elapsed time.
    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn elapsed_ms(&self) -> u64 {
        self.now.get()
    }
}
