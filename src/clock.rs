//! Clock abstraction for time-dependent behavior.
//!
//! The engine never reads wall-clock time directly. Everything that needs
//! "now" (TTL expiry, creation timestamps, usage reports) goes through the
//! [`Clock`] trait so tests can substitute a [`FakeClock`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Get the current time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// A clock backed by the system time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        SystemClock
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A manually controlled clock for tests.
#[derive(Debug, Default)]
pub struct FakeClock {
    now_ms: Mutex<i64>,
}

impl FakeClock {
    /// Create a fake clock starting at time zero.
    pub fn new() -> Self {
        FakeClock {
            now_ms: Mutex::new(0),
        }
    }

    /// Create a fake clock starting at the given time.
    pub fn at(now_ms: i64) -> Arc<Self> {
        Arc::new(FakeClock {
            now_ms: Mutex::new(now_ms),
        })
    }

    /// Set the current time.
    pub fn set_now_ms(&self, now_ms: i64) {
        *self.now_ms.lock() = now_ms;
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance_ms(&self, delta_ms: i64) {
        *self.now_ms.lock() += delta_ms;
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        *self.now_ms.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock() {
        let clock = FakeClock::at(100);
        assert_eq!(clock.now_ms(), 100);

        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 600);

        clock.set_now_ms(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
