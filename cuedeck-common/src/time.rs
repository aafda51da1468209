//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Convert a (possibly fractional) second count to whole milliseconds.
///
/// Negative and non-finite inputs map to zero.
pub fn secs_to_millis(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

/// Render milliseconds as `m:ss` (or `h:mm:ss` past one hour)
pub fn format_millis(millis: u64) -> String {
    let total_secs = millis / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        // After 2000-01-01, before 2100-01-01
        assert!(timestamp.timestamp() > 946_684_800);
        assert!(timestamp.timestamp() < 4_102_444_800);
    }

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(0), Duration::ZERO);
        assert_eq!(millis_to_duration(1000), Duration::from_secs(1));
    }

    #[test]
    fn test_secs_to_millis() {
        assert_eq!(secs_to_millis(1.5), 1500);
        assert_eq!(secs_to_millis(0.0), 0);
        assert_eq!(secs_to_millis(-3.0), 0);
        assert_eq!(secs_to_millis(f64::NAN), 0);
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "0:00");
        assert_eq!(format_millis(65_000), "1:05");
        assert_eq!(format_millis(3_725_000), "1:02:05");
    }
}
