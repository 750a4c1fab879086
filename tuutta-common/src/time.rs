//! Timestamp utilities

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Whole days elapsed between `earlier` and `later` (negative if reversed)
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later - earlier).num_days()
}

/// Fractional days elapsed between `earlier` and `later`
pub fn fractional_days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 86_400_000.0
}

/// The `count` calendar days ending at (and including) the day of `now`, oldest first
pub fn trailing_days(now: DateTime<Utc>, count: u32) -> Vec<NaiveDate> {
    let today = now.date_naive();
    (0..count as i64)
        .rev()
        .map(|offset| today - Duration::days(offset))
        .collect()
}
