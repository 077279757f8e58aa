//! Event-time conversions
//!
//! Window arithmetic runs on `i64` Unix milliseconds; the wire carries
//! `DateTime<Utc>`.

use chrono::{DateTime, Utc};

/// Unix milliseconds of an instant.
pub fn to_epoch_millis(instant: &DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Instant for a Unix millisecond value, saturating at chrono's bounds.
pub fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    match DateTime::from_timestamp_millis(millis) {
        Some(instant) => instant,
        None if millis < 0 => DateTime::<Utc>::MIN_UTC,
        None => DateTime::<Utc>::MAX_UTC,
    }
}

/// Instant for fractional Unix seconds (e.g. `1708123456.789`).
///
/// Returns None for negative, non-finite or out-of-range values.
pub fn from_epoch_seconds_f64(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = seconds.trunc();
    if whole > i64::MAX as f64 {
        return None;
    }
    let nanos = ((seconds - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
