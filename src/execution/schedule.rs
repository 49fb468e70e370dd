use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::models::Candle;

/// Seconds after a candle boundary to wait before fetching, so the exchange
/// has finalized the closed candle.
const CLOSE_BUFFER_SECS: i64 = 5;

/// If the next boundary is closer than this, skip it: the cycle would race
/// the close and read a half-formed candle.
const MIN_LEAD_SECS: i64 = 60;

/// Parse a timeframe label ("1m", "15m", "1h", "4h", "1d") into seconds.
pub fn timeframe_secs(timeframe: &str) -> Option<i64> {
    let (digits, unit) = timeframe.split_at(timeframe.len().checked_sub(1)?);
    let n: i64 = digits.parse().ok()?;
    if n <= 0 {
        return None;
    }
    let unit_secs = match unit {
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return None,
    };
    Some(n * unit_secs)
}

/// Duration to sleep from `now` until the cycle aligned with the next candle
/// close.
///
/// Cycles run once per closed candle: the wake time is the next timeframe
/// boundary plus a small buffer. A boundary less than [`MIN_LEAD_SECS`] away
/// is skipped in favor of the one after it.
pub fn next_cycle_delay(now: DateTime<Utc>, tf_secs: i64) -> Duration {
    let elapsed_in_candle = now.timestamp().rem_euclid(tf_secs);
    let mut until_boundary = tf_secs - elapsed_in_candle;
    if until_boundary < MIN_LEAD_SECS {
        until_boundary += tf_secs;
    }
    Duration::from_secs((until_boundary + CLOSE_BUFFER_SECS) as u64)
}

/// Whether `candle` has closed as of `now`. The exchange returns the
/// still-forming candle last; decisions only ever use closed ones.
pub fn is_closed(candle: &Candle, now: DateTime<Utc>, tf_secs: i64) -> bool {
    candle.open_time + ChronoDuration::seconds(tf_secs) <= now
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!(timeframe_secs("1m"), Some(60));
        assert_eq!(timeframe_secs("15m"), Some(900));
        assert_eq!(timeframe_secs("1h"), Some(3600));
        assert_eq!(timeframe_secs("4h"), Some(14400));
        assert_eq!(timeframe_secs("1d"), Some(86400));
        assert_eq!(timeframe_secs("15x"), None);
        assert_eq!(timeframe_secs("m"), None);
        assert_eq!(timeframe_secs("0m"), None);
        assert_eq!(timeframe_secs(""), None);
    }

    #[test]
    fn test_delay_targets_next_boundary_plus_buffer() {
        // 12:03:00 on a 15m timeframe: next boundary at 12:15:00
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 3, 0).unwrap();
        let delay = next_cycle_delay(now, 900);
        assert_eq!(delay, Duration::from_secs(12 * 60 + 5));
    }

    #[test]
    fn test_near_boundary_skips_to_following_candle() {
        // 12:14:30: the 12:15 boundary is 30s away, inside the minimum lead
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 14, 30).unwrap();
        let delay = next_cycle_delay(now, 900);
        assert_eq!(delay, Duration::from_secs(30 + 900 + 5));
    }

    #[test]
    fn test_exactly_on_boundary_waits_a_full_candle() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 15, 0).unwrap();
        let delay = next_cycle_delay(now, 900);
        assert_eq!(delay, Duration::from_secs(900 + 5));
    }

    #[test]
    fn test_forming_candle_is_not_closed() {
        let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let candle = Candle {
            open_time,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1.0,
        };
        let mid_candle = Utc.with_ymd_and_hms(2024, 1, 1, 12, 7, 0).unwrap();
        let after_close = Utc.with_ymd_and_hms(2024, 1, 1, 12, 15, 0).unwrap();

        assert!(!is_closed(&candle, mid_candle, 900));
        assert!(is_closed(&candle, after_close, 900));
    }
}
