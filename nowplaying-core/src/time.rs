//! Time and duration conversion utilities.
//!
//! Durations and instants cross three representations in this crate: std
//! `Duration` for timers, chrono `DateTime<Utc>` for wall-clock instants, and
//! Unix milliseconds for SQLite columns and the wire format. Conversions
//! saturate instead of truncating.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;

    /// Convert duration to a chrono `TimeDelta`, saturating at `TimeDelta::MAX`.
    fn to_time_delta(&self) -> TimeDelta;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }

    fn to_time_delta(&self) -> TimeDelta {
        TimeDelta::from_std(*self).unwrap_or(TimeDelta::MAX)
    }
}

/// Convert Unix milliseconds to a UTC instant.
///
/// Out-of-range values clamp to the Unix epoch.
#[must_use]
pub fn utc_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// The instant `expires_in` from `now`, saturating at the far future.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, expires_in: Duration) -> DateTime<Utc> {
    now.checked_add_signed(expires_in.to_time_delta())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
