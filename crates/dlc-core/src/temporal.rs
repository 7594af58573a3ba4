//! # Temporal Types — Epoch Milliseconds and Clocks
//!
//! Scheduler targets are persisted as epoch milliseconds. `0` is reserved
//! for "no timer scheduled" and is never produced by [`EpochMillis::now`]
//! on a sane clock.
//!
//! ## Clock Jumps
//!
//! Wall-clock time can be corrected by the network or the user while the
//! process runs. [`Clock::monotonic_millis`] never jumps, so the difference
//! between wall-clock progress and monotonic progress over the same window
//! is the size of the jump. The scheduler uses this to shift its persisted
//! targets.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A wall-clock instant in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochMillis(i64);

impl EpochMillis {
    /// The reserved "unset" value.
    pub const UNSET: Self = Self(0);

    /// Wrap a raw millisecond count.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// The raw millisecond count.
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Whether this is the reserved "unset" value.
    pub const fn is_unset(&self) -> bool {
        self.0 == 0
    }

    /// This instant shifted forward by `delay`, saturating at `i64::MAX`.
    pub fn saturating_add(&self, delay: Duration) -> Self {
        let delta = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(delta))
    }

    /// This instant shifted by a signed number of milliseconds.
    pub fn shifted_by(&self, delta_millis: i64) -> Self {
        Self(self.0.saturating_add(delta_millis))
    }

    /// Time remaining from `now` until this instant, clamped at zero.
    pub fn remaining_since(&self, now: EpochMillis) -> Duration {
        let remaining = self.0.saturating_sub(now.0);
        Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
    }

    /// Convert to a `chrono` UTC datetime.
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, ValidationError> {
        DateTime::from_timestamp_millis(self.0).ok_or(ValidationError::TimestampOutOfRange(self.0))
    }
}

impl From<DateTime<Utc>> for EpochMillis {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl std::fmt::Display for EpochMillis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unset() {
            return f.write_str("unset");
        }
        match self.to_datetime() {
            Ok(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> EpochMillis;

    /// Milliseconds on a clock that never jumps. Only differences between
    /// two readings are meaningful.
    fn monotonic_millis(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a system clock whose monotonic readings start at zero.
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
    fn now(&self) -> EpochMillis {
        EpochMillis::now()
    }

    fn monotonic_millis(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}
