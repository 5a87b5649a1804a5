//! Timestamp sources for bind mutations.
//!
//! A [`Clock`] hands out the `updated_at` value of each mutation. The
//! production [`SystemClock`] follows the wall clock but never repeats or
//! goes backwards, so a rebind always carries a stamp strictly later than
//! the one it replaces.

use std::sync::{Mutex, PoisonError};

use crate::temporal::Timestamp;

/// Source of mutation timestamps.
pub trait Clock: Send + Sync {
    /// A timestamp strictly greater than every one previously returned.
    fn now(&self) -> Timestamp;
}

/// Monotonic wall clock.
///
/// - If the wall clock advanced past the last stamp, the wall clock wins.
/// - Otherwise (same microsecond, or the wall clock stepped back) the last
///   stamp is bumped by one microsecond.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Timestamp>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Timestamp::wall_clock();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = if wall > *last { wall } else { last.next() };
        *last = stamp;
        stamp
    }
}

/// Settable clock for tests.
///
/// Each read returns the current value and then advances it by one
/// microsecond, so successive stamps stay strictly increasing.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Timestamp) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }

    /// Move forward by `micros`.
    pub fn advance(&self, micros: i64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = Timestamp::from_micros(current.as_micros().saturating_add(micros));
    }

    /// The value the next [`Clock::now`] call will return.
    pub fn peek(&self) -> Timestamp {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Timestamp::from_micros(1))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = *current;
        *current = stamp.next();
        stamp
    }
}
