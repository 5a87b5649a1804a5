use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Mutation timestamp of a bind.
///
/// Microseconds since the UNIX epoch. Every bind mutation stamps a fresh
/// value taken from a [`Clock`](crate::Clock); comparing two timestamps of
/// the same bind tells whether it changed in between.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The epoch. Sorts before every stamped value.
    pub const EPOCH: Self = Self(0);

    /// Create from raw microseconds.
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Raw microseconds since the epoch.
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Current wall-clock time. Not monotonic; use a clock for stamping.
    pub fn wall_clock() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Self(i64::try_from(micros).unwrap_or(i64::MAX))
    }

    /// The smallest timestamp strictly after this one.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Convert to a UTC date-time.
    pub fn to_datetime(self) -> Result<DateTime<Utc>, TypeError> {
        DateTime::<Utc>::from_timestamp_micros(self.0).ok_or(TypeError::TimestampOutOfRange(self.0))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}us)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Ok(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Err(_) => write!(f, "{}us", self.0),
        }
    }
}
