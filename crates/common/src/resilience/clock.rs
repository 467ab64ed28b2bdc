//! Time abstraction for deterministic testing.
//!
//! Components that make time-based decisions (breaker timeouts, sliding
//! rate windows, retention sweeps) take a [`Clock`] so tests can drive time
//! with [`MockClock`] instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since the UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Real system clock for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually advanced clock for tests.
///
/// Clones share the same elapsed counter, so a clock handed to a component
/// can still be advanced from the test body.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    epoch_offset: Duration,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Mock clock whose wall time starts at the UNIX epoch.
    pub fn new() -> Self {
        Self { start: Instant::now(), epoch_offset: Duration::ZERO, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Mock clock whose wall time starts at `since_epoch` after the UNIX
    /// epoch. Useful when timestamps are rendered as calendar dates.
    pub fn starting_at(since_epoch: Duration) -> Self {
        Self { epoch_offset: since_epoch, ..Self::new() }
    }

    /// Advance by a duration without sleeping.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the elapsed time directly.
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Elapsed time since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.epoch_offset + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advances_both_views() {
        let clock = MockClock::new();
        let t0 = clock.now();

        clock.advance_millis(1500);

        assert_eq!(clock.now().duration_since(t0), Duration::from_millis(1500));
        assert_eq!(clock.millis_since_epoch(), 1500);
    }

    /// Clones observe advances made through the original.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new();
        let shared = clock.clone();

        clock.advance(Duration::from_secs(5));
        assert_eq!(shared.elapsed(), Duration::from_secs(5));

        shared.set_elapsed(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_starting_at_offsets_wall_time() {
        let clock = MockClock::starting_at(Duration::from_secs(1_700_000_000));
        assert_eq!(clock.millis_since_epoch(), 1_700_000_000_000);
    }
}
