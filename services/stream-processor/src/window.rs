//! Tumbling window assignment
//!
//! Windows are fixed-size, non-overlapping and aligned to multiples of the
//! window size since the Unix epoch. A window covers the half-open range
//! `[start, end)` in event time; there is no grace period past `end`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::time::from_epoch_millis;

/// Window length in whole milliseconds, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSize(i64);

impl WindowSize {
    /// Five minutes.
    pub const DEFAULT: WindowSize = WindowSize(5 * 60 * 1_000);

    /// Returns None for zero, sub-millisecond or unrepresentable durations.
    pub fn try_from_duration(duration: Duration) -> Option<Self> {
        let millis = i64::try_from(duration.as_millis()).ok()?;
        if millis == 0 || duration.subsec_nanos() % 1_000_000 != 0 {
            return None;
        }
        Some(Self(millis))
    }

    pub fn from_secs(secs: u64) -> Option<Self> {
        Self::try_from_duration(Duration::from_secs(secs))
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0 as u64)
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One tumbling window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    /// Window containing `timestamp_millis`.
    ///
    /// `start = floor(ts / size) * size`. Floor division keeps pre-epoch
    /// instants in the window below them; the start saturates at `i64::MIN`.
    pub fn assign(timestamp_millis: i64, size: WindowSize) -> Self {
        let size = size.as_millis();
        let start = timestamp_millis.saturating_sub(timestamp_millis.rem_euclid(size));
        Self {
            start,
            end: start.saturating_add(size),
        }
    }

    /// Whether `timestamp_millis` falls in `[start, end)`.
    pub fn contains(&self, timestamp_millis: i64) -> bool {
        self.start <= timestamp_millis && timestamp_millis < self.end
    }

    /// Whether the window is over once event time reaches `instant_millis`.
    pub fn is_closed_at(&self, instant_millis: i64) -> bool {
        instant_millis >= self.end
    }

    pub fn size_millis(&self) -> i64 {
        self.end - self.start
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        from_epoch_millis(self.start)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        from_epoch_millis(self.end)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_time().to_rfc3339(), self.end_time().to_rfc3339())
    }
}
