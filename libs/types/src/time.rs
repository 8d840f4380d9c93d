//! Millisecond timestamps and UTC day windows
//!
//! All engine timestamps are Unix epoch milliseconds (`i64`). Day
//! alignment is floor arithmetic on the epoch, which is exact for UTC.

use chrono::{TimeZone, Utc};

/// One UTC day in milliseconds.
pub const DAY_MS: i64 = 86_400_000;

/// Floor a timestamp to UTC midnight of its day.
pub fn day_start_ms(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(DAY_MS) * DAY_MS
}

/// The half-open UTC day window `[start, end)` containing `ts_ms`.
pub fn day_window(ts_ms: i64) -> (i64, i64) {
    let start = day_start_ms(ts_ms);
    (start, start + DAY_MS)
}

/// Whether two timestamps fall within the same UTC day.
pub fn same_utc_day(a_ms: i64, b_ms: i64) -> bool {
    day_start_ms(a_ms) == day_start_ms(b_ms)
}

/// Human-readable UTC date for log fields, e.g. "2026-08-22".
pub fn day_label(ts_ms: i64) -> String {
    match Utc.timestamp_millis_opt(ts_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => format!("epoch_ms:{}", ts_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_start_floors_to_midnight() {
        // 2024-02-17 12:34:56 UTC
        let ts = 1_708_173_296_000;
        let start = day_start_ms(ts);
        assert_eq!(start % DAY_MS, 0);
        assert!(start <= ts && ts < start + DAY_MS);
    }

    #[test]
    fn test_day_window_is_half_open() {
        let ts = 1_708_173_296_000;
        let (start, end) = day_window(ts);
        assert_eq!(end - start, DAY_MS);
        assert!(same_utc_day(start, end - 1));
        assert!(!same_utc_day(start, end));
    }

    #[test]
    fn test_rollover_boundary() {
        let (start, end) = day_window(1_708_173_296_000);
        assert_eq!(day_start_ms(end), end);
        assert_eq!(day_start_ms(end - 1), start);
    }

    #[test]
    fn test_negative_timestamps_floor_down() {
        // div_euclid keeps pre-epoch timestamps on their own day.
        assert_eq!(day_start_ms(-1), -DAY_MS);
        assert_eq!(day_start_ms(-DAY_MS), -DAY_MS);
    }

    #[test]
    fn test_day_label() {
        assert_eq!(day_label(0), "1970-01-01");
        assert_eq!(day_label(1_708_173_296_000), "2024-02-17");
    }
}
