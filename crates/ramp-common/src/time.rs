//! Time sources for the ramp.
//!
//! All clocks report time as a [`Duration`] since a clock-specific epoch.
//! Only differences between two readings of the same clock are meaningful.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of "now" plus a blocking sleep.
pub trait Clock: Send + Sync {
    /// Current time since this clock's epoch.
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Short identifier for logs.
    fn name(&self) -> &'static str {
        "clock"
    }
}

impl<K: Clock + ?Sized> Clock for &K {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<K: Clock + ?Sized> Clock for Arc<K> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<K: Clock + ?Sized> Clock for Box<K> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Monotonic clock anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is now.
    #[must_use]
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn name(&self) -> &'static str {
        "monotonic"
    }
}

/// Wall clock measured from the UNIX epoch.
///
/// Follows system time adjustments, so consecutive readings may decrease.
/// A system time before 1970 reads as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn name(&self) -> &'static str {
        "wall"
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` advances the clock instead of blocking. Clones share the
/// same time, so a test can hand one clone to the driver and inspect
/// or advance another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock reading `start`.
    #[must_use]
    pub fn starting_at(start: Duration) -> Self {
        let clock = Self::new();
        clock.set(start);
        clock
    }

    /// Move time forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.nanos.fetch_add(saturating_nanos(delta), Ordering::SeqCst);
    }

    /// Jump to an absolute reading. May move time backwards.
    pub fn set(&self, now: Duration) {
        self.nanos.store(saturating_nanos(now), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.sleep(Duration::from_millis(100));
        clock.sleep(Duration::from_millis(100));
        assert_eq!(clock.now(), Duration::from_millis(200));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(Duration::from_secs(10));
        let observer = clock.clone();

        clock.advance(Duration::from_secs(1));
        assert_eq!(observer.now(), Duration::from_secs(11));

        observer.set(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_monotonic_clock_never_decreases() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b >= a + Duration::from_millis(2));
    }

    #[test]
    fn test_wall_clock_is_after_epoch() {
        assert!(WallClock.now() > Duration::from_secs(1_000_000_000));
    }

    #[test]
    fn test_shared_clock_delegates() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        clock.sleep(Duration::from_secs(2));
        assert_eq!(clock.now(), Duration::from_secs(2));
        assert_eq!(clock.name(), "manual");
    }
}
