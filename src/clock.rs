//! Wall-clock abstraction.
//!
//! The rate limiter and time-gate stage need a source of "now" that tests
//! can freeze and advance deterministically. Production code uses
//! [`SystemClock`]; tests use [`FrozenClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Returns the current instant (for monotonic duration arithmetic) and the
/// current second-of-minute (for the time-gate stage).
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Seconds elapsed in the current minute, 0–59, per the system's wall clock.
    fn second_of_minute(&self) -> u32 {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        (secs % 60) as u32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose `now()` and `second_of_minute()` can be set explicitly from
/// tests. `now()` is anchored to a fixed [`Instant`] plus an offset so that
/// elapsed-duration arithmetic in the rate limiter behaves exactly as if
/// real time had passed.
pub struct FrozenClock {
    base: Instant,
    offset_ms: AtomicU64,
    second_of_minute: AtomicU64,
}

impl FrozenClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
            second_of_minute: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_second_of_minute(&self, secs: u32) {
        self.second_of_minute.store(secs as u64, Ordering::SeqCst);
    }
}

impl Default for FrozenClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }

    fn second_of_minute(&self) -> u32 {
        self.second_of_minute.load(Ordering::SeqCst) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_advances_monotonically() {
        let clock = FrozenClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_millis(500));
        let t1 = clock.now();
        assert!(t1 > t0);
        assert_eq!(t1 - t0, Duration::from_millis(500));
    }

    #[test]
    fn frozen_clock_second_of_minute_is_settable() {
        let clock = FrozenClock::new();
        assert_eq!(clock.second_of_minute(), 0);
        clock.set_second_of_minute(7);
        assert_eq!(clock.second_of_minute(), 7);
    }
}
