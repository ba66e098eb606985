//! Cron-driven periodic scan.

pub mod engine;

use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

pub use self::engine::{run_scan_loop, run_scan_once, ScanReport, SuppressedCandidate};

/// Parse a cron expression (seconds field first, 6 or 7 fields).
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(expr).map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))
}

/// Upper bound on the runs returned by [`preview`].
pub const MAX_PREVIEW_RUNS: usize = 500;

/// Run times of `schedule` after `from`, up to `hours` ahead and at most
/// [`MAX_PREVIEW_RUNS`] of them.
pub fn preview(schedule: &Schedule, from: DateTime<Utc>, hours: u32) -> Vec<DateTime<Utc>> {
    let end = from
        .checked_add_signed(Duration::hours(i64::from(hours)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    schedule
        .after(&from)
        .take_while(|t| *t <= end)
        .take(MAX_PREVIEW_RUNS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_schedule() {
        assert!(parse_schedule("0 */5 * * * *").is_ok());
        let err = parse_schedule("every five minutes").unwrap_err();
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_preview_bounds() {
        let schedule = parse_schedule("0 0 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        let runs = preview(&schedule, from, 3);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0], Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap());
        assert_eq!(runs[2], Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_preview_is_capped() {
        let schedule = parse_schedule("0 * * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        let runs = preview(&schedule, from, u32::MAX);
        assert_eq!(runs.len(), MAX_PREVIEW_RUNS);
        assert!(runs.windows(2).all(|w| w[0] < w[1]));
    }
}
