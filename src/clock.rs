//! Monotonic millisecond clock capability
//!
//! The tree never reads time directly; it goes through a [`Clock`] so tests
//! and embedders can inject a deterministic source. The contract is a single
//! operation: current time in integer milliseconds, monotonically
//! non-decreasing for the process lifetime. Wall-clock sources that can jump
//! backwards must not be used, because `spent` arithmetic assumes
//! non-decreasing readings.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic millisecond clock
///
/// # Contract
///
/// Successive calls to [`now_millis`](Clock::now_millis) on the same clock
/// must return non-decreasing values. Implementations are shared between the
/// tree and any in-flight measurements, so readings must be safe to take from
/// a `&self` held by several tasks.
pub trait Clock: Send + Sync {
    /// Current time in integer milliseconds, monotonic for the process lifetime
    fn now_millis(&self) -> u64;
}

/// Default clock backed by [`std::time::Instant`]
///
/// Readings are milliseconds elapsed since the clock was created, so a fresh
/// tree starts near zero rather than at an arbitrary epoch offset.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven clock for deterministic tests
///
/// Cloning yields a handle to the same underlying reading, so a test can keep
/// one handle while the tree owns another and advance time between measured
/// steps.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a manual clock starting at the given millisecond reading
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    /// Advance the clock by the given number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute reading
    ///
    /// Setting the clock backwards breaks the monotonicity contract for any
    /// timer still open across the jump; tests that rewind must only do so
    /// between independent measurements.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_millis(), 100);

        clock.advance(50);
        assert_eq!(clock.now_millis(), 150);

        clock.set(1000);
        assert_eq!(clock.now_millis(), 1000);
    }

    #[test]
    fn test_manual_clock_shared_handles() {
        let clock = ManualClock::new(0);
        let handle = clock.clone();

        handle.advance(25);
        assert_eq!(clock.now_millis(), 25);
    }
}
