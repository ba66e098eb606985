//! Flapping detection: alerts oscillating between states in a short window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::noise::{AlertHistoryEntry, AlertRecord};

/// Number of adjacent status changes in an ordered sequence.
pub fn count_transitions<'a>(statuses: impl IntoIterator<Item = &'a str>) -> usize {
    let mut iter = statuses.into_iter();
    let Some(mut prev) = iter.next() else {
        return 0;
    };
    let mut transitions = 0;
    for status in iter {
        if status != prev {
            transitions += 1;
        }
        prev = status;
    }
    transitions
}

/// History (newest first) shows at least `threshold` rows and
/// `threshold` status transitions.
pub fn is_flapping(history: &[AlertHistoryEntry], threshold: usize) -> bool {
    if history.len() < threshold {
        return false;
    }
    count_transitions(history.iter().map(|h| h.status.as_str())) >= threshold
}

/// An oscillating (device, alert type) pair, for operator review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlappingAlert {
    pub device_id: String,
    pub alert_type: String,
    pub occurrences: usize,
    pub transitions: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub flaps_per_hour: f64,
}

/// Group records by (device, alert type) and report the flapping ones,
/// most transitions first.
pub fn find_flapping(records: &[AlertRecord], threshold: usize, window_hours: f64) -> Vec<FlappingAlert> {
    let mut groups: HashMap<(&str, &str), Vec<&AlertRecord>> = HashMap::new();
    for r in records {
        groups
            .entry((r.device_id.as_str(), r.alert_type.as_str()))
            .or_default()
            .push(r);
    }

    let mut found: Vec<FlappingAlert> = groups
        .into_iter()
        .filter(|(_, rows)| rows.len() >= threshold)
        .filter_map(|((device_id, alert_type), mut rows)| {
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let transitions = count_transitions(rows.iter().map(|r| r.status.as_str()));
            if transitions < threshold {
                return None;
            }
            let last_seen = rows.first()?.created_at;
            let first_seen = rows.last()?.created_at;
            Some(FlappingAlert {
                device_id: device_id.to_string(),
                alert_type: alert_type.to_string(),
                occurrences: rows.len(),
                transitions,
                first_seen,
                last_seen,
                flaps_per_hour: if window_hours > 0.0 {
                    transitions as f64 / window_hours
                } else {
                    0.0
                },
            })
        })
        .collect();

    found.sort_by(|a, b| {
        b.transitions
            .cmp(&a.transitions)
            .then_with(|| a.device_id.cmp(&b.device_id))
            .then_with(|| a.alert_type.cmp(&b.alert_type))
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap()
    }

    fn record(device: &str, alert_type: &str, status: &str, minutes: i64) -> AlertRecord {
        AlertRecord {
            device_id: device.into(),
            alert_type: alert_type.into(),
            status: status.into(),
            created_at: t0() + Duration::minutes(minutes),
            resolved_at: None,
        }
    }

    #[test]
    fn test_count_transitions() {
        assert_eq!(count_transitions(Vec::<&str>::new()), 0);
        assert_eq!(count_transitions(["active"]), 0);
        assert_eq!(count_transitions(["active", "active", "resolved"]), 1);
        assert_eq!(count_transitions(["a", "r", "a", "r", "a"]), 4);
    }

    #[test]
    fn test_is_flapping_needs_rows_and_transitions() {
        let entry = |status: &str, m: i64| AlertHistoryEntry {
            status: status.into(),
            created_at: t0() - Duration::minutes(m),
            resolved_at: None,
        };
        let oscillating: Vec<_> = (0..6)
            .map(|i| entry(if i % 2 == 0 { "active" } else { "resolved" }, i))
            .collect();
        assert!(is_flapping(&oscillating, 5));
        assert!(!is_flapping(&oscillating[..5], 5));

        let steady: Vec<_> = (0..8).map(|i| entry("active", i)).collect();
        assert!(!is_flapping(&steady, 5));
    }

    #[test]
    fn test_find_flapping_groups_and_sorts() {
        let mut records = Vec::new();
        for i in 0..8 {
            let status = if i % 2 == 0 { "active" } else { "resolved" };
            records.push(record("D1", "link_down", status, i * 3));
        }
        for i in 0..6 {
            let status = if i % 2 == 0 { "active" } else { "resolved" };
            records.push(record("D2", "link_down", status, i * 3));
        }
        for i in 0..10 {
            records.push(record("D3", "disk_full", "active", i));
        }

        let found = find_flapping(&records, 5, 2.0);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].device_id, "D1");
        assert_eq!(found[0].transitions, 7);
        assert_eq!(found[0].occurrences, 8);
        assert_eq!(found[0].first_seen, t0());
        assert_eq!(found[0].last_seen, t0() + Duration::minutes(21));
        assert!((found[0].flaps_per_hour - 3.5).abs() < 1e-9);
        assert_eq!(found[1].device_id, "D2");
    }
}
