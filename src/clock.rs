//! Injectable clock abstraction.
//!
//! The analyzer never reads wall time directly: every "now" flows through
//! a [`Clock`] supplied at build time. Production uses [`SystemClock`];
//! tests pin a [`FixedClock`] to a known instant so interval bucketing
//! and the future-timestamp assertion are deterministic.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Source of the analyzer's notion of "now".
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time. The production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a settable instant, for tests.
///
/// Interior mutability lets a test advance time between analyzer builds
/// while the analyzer holds a shared reference to the same clock.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock pinned at `instant`.
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    /// Move the clock to a new instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock().expect("clock mutex poisoned") = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().expect("clock mutex poisoned")
    }
}
