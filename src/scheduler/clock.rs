//! Wall-clock arithmetic for the 4-hour rebalance cadence.

use chrono::{DateTime, Duration, Utc};

/// Rebalances happen at 00:00, 04:00, ..., 20:00 UTC.
pub const REBALANCE_INTERVAL_HOURS: i64 = 4;

/// Wait past the boundary so the 4h candle has closed on the exchange.
pub const SETTLE_BUFFER_SECS: i64 = 60;

/// The first 4-hour UTC boundary strictly after `now`.
pub fn next_rebalance_time(now: DateTime<Utc>) -> DateTime<Utc> {
    let interval = REBALANCE_INTERVAL_HOURS * 3600;
    let next = (now.timestamp().div_euclid(interval) + 1) * interval;
    DateTime::<Utc>::from_timestamp(next, 0)
        .unwrap_or_else(|| now + Duration::hours(REBALANCE_INTERVAL_HOURS))
}

/// How long to sleep from `now` until the next cycle should start.
pub fn sleep_duration(now: DateTime<Utc>) -> std::time::Duration {
    let wake = next_rebalance_time(now) + Duration::seconds(SETTLE_BUFFER_SECS);
    (wake - now).to_std().unwrap_or_default()
}
