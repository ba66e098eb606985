//! Duplicate and rate-limit windows.
//!
//! Both maps live in one struct so the engine can guard them with a single
//! lock: the duplicate check, the rate check and both updates happen as one
//! step, and two simultaneous identical alerts cannot both be admitted.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::alert::AlertCandidate;
use crate::config::NoiseConfig;
use crate::noise::SuppressReason;

type DedupKey = (String, String, String);
type RateKey = (String, String);

pub struct AlertWindows {
    duplicate_window: Duration,
    rate_window: Duration,
    rate_threshold: usize,
    last_seen: HashMap<DedupKey, DateTime<Utc>>,
    admitted: HashMap<RateKey, VecDeque<DateTime<Utc>>>,
}

impl AlertWindows {
    pub fn new(config: &NoiseConfig) -> Self {
        Self {
            duplicate_window: config.duplicate_window(),
            rate_window: config.rate_limit_window(),
            rate_threshold: config.rate_limit_threshold,
            last_seen: HashMap::new(),
            admitted: HashMap::new(),
        }
    }

    /// Run the duplicate check then the rate limit for `candidate`,
    /// recording it in whichever window it passes.
    pub fn check(&mut self, candidate: &AlertCandidate) -> Option<SuppressReason> {
        let now = candidate.timestamp;
        self.purge(now);

        let dedup_key = (
            candidate.device_id.clone(),
            candidate.alert_type.clone(),
            candidate.message.clone(),
        );
        if let Some(&seen) = self.last_seen.get(&dedup_key) {
            if now - seen < self.duplicate_window {
                debug!(device = %candidate.device_id, alert_type = %candidate.alert_type, "duplicate alert");
                return Some(SuppressReason::Duplicate);
            }
        }
        self.last_seen.insert(dedup_key, now);

        let rate_key = (candidate.device_id.clone(), candidate.alert_type.clone());
        let stamps = self.admitted.entry(rate_key).or_default();
        while stamps.front().is_some_and(|&t| now - t >= self.rate_window) {
            stamps.pop_front();
        }
        if stamps.len() >= self.rate_threshold {
            debug!(
                device = %candidate.device_id,
                alert_type = %candidate.alert_type,
                count = stamps.len(),
                "rate limit reached"
            );
            return Some(SuppressReason::RateLimited);
        }
        stamps.push_back(now);
        None
    }

    /// Drop duplicate entries and rate windows that can no longer matter.
    fn purge(&mut self, now: DateTime<Utc>) {
        let dup = self.duplicate_window;
        self.last_seen.retain(|_, seen| now - *seen < dup);

        let rate = self.rate_window;
        self.admitted.retain(|_, stamps| {
            stamps.back().is_some_and(|&t| now - t < rate)
        });
    }

    /// (dedup entries, rate-limit keys) currently tracked.
    pub fn tracked(&self) -> (usize, usize) {
        (self.last_seen.len(), self.admitted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Severity;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).unwrap()
    }

    fn alert(message: &str, at: DateTime<Utc>) -> AlertCandidate {
        AlertCandidate::new("D", "cpu_high", message, Severity::Warning).at(at)
    }

    #[test]
    fn test_duplicate_inside_window() {
        let mut w = AlertWindows::new(&NoiseConfig::default());
        assert_eq!(w.check(&alert("cpu>90%", t0())), None);
        assert_eq!(
            w.check(&alert("cpu>90%", t0() + Duration::seconds(60))),
            Some(SuppressReason::Duplicate)
        );
        // Outside the 5 minute window it is new again.
        assert_eq!(w.check(&alert("cpu>90%", t0() + Duration::minutes(6))), None);
    }

    #[test]
    fn test_rate_limit_admits_threshold_then_blocks() {
        let mut w = AlertWindows::new(&NoiseConfig::default());
        for i in 0..10 {
            let at = t0() + Duration::seconds(i);
            assert_eq!(w.check(&alert(&format!("msg {}", i), at)), None, "call {}", i + 1);
        }
        assert_eq!(
            w.check(&alert("msg 10", t0() + Duration::seconds(10))),
            Some(SuppressReason::RateLimited)
        );
    }

    #[test]
    fn test_rate_window_slides() {
        let config = NoiseConfig {
            rate_limit_threshold: 2,
            ..NoiseConfig::default()
        };
        let mut w = AlertWindows::new(&config);
        assert_eq!(w.check(&alert("a", t0())), None);
        assert_eq!(w.check(&alert("b", t0() + Duration::minutes(30))), None);
        assert_eq!(
            w.check(&alert("c", t0() + Duration::minutes(59))),
            Some(SuppressReason::RateLimited)
        );
        // The first stamp has aged out.
        assert_eq!(w.check(&alert("d", t0() + Duration::minutes(61))), None);
    }

    #[test]
    fn test_stale_entries_are_purged() {
        let mut w = AlertWindows::new(&NoiseConfig::default());
        w.check(&alert("a", t0()));
        w.check(&alert("b", t0()));
        assert_eq!(w.tracked(), (2, 1));
        w.check(&AlertCandidate::new("E", "mem", "x", Severity::Info).at(t0() + Duration::hours(2)));
        assert_eq!(w.tracked(), (1, 1));
    }
}
