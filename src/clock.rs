//! Wall-clock abstraction.
//!
//! Limiter strategies and the in-memory store read time through a [`Clock`]
//! handed to them at construction, so a test can replay an exact sequence of
//! timestamps against a fresh limiter.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

/// Source of the current time, expressed as a duration since the UNIX epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time since the UNIX epoch.
    fn now(&self) -> Duration;

    /// Current time in whole seconds.
    fn now_secs(&self) -> i64 {
        self.now().as_secs() as i64
    }

    /// Current time in nanoseconds.
    fn now_nanos(&self) -> i64 {
        self.now().as_nanos() as i64
    }
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        let now = Utc::now();
        Duration::new(now.timestamp().max(0) as u64, now.timestamp_subsec_nanos())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: RwLock<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Duration) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Create a clock frozen at `secs` seconds past the epoch.
    pub fn at_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Jump to an absolute time. Moving backwards is allowed.
    pub fn set(&self, now: Duration) {
        *self.now.write() = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.read()
    }
}
