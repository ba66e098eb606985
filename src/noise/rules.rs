//! Suppression rule validation, matching, and the copy-on-write rule cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Datelike, Utc};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::alert::AlertCandidate;
use crate::noise::{NoiseError, RuleType, SuppressionRule};
use crate::storage::SuppressionRuleStore;

/// How a rule's `alert_pattern` is tested against an alert. Decided once,
/// when the rule is validated.
#[derive(Debug, Clone)]
pub enum MatchSpec {
    /// Case-insensitive substring; the needle is stored lowercased.
    Substring(String),
    /// Case-insensitive regex search.
    Regex(Regex),
}

impl MatchSpec {
    pub fn for_rule(rule_type: RuleType, pattern: &str) -> Result<Self, NoiseError> {
        match rule_type {
            RuleType::Regex => RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(MatchSpec::Regex)
                .map_err(|e| NoiseError::InvalidRule(format!("bad regex '{}': {}", pattern, e))),
            _ => Ok(MatchSpec::Substring(pattern.to_lowercase())),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            MatchSpec::Substring(needle) => text.to_lowercase().contains(needle.as_str()),
            MatchSpec::Regex(re) => re.is_match(text),
        }
    }
}

/// Check a rule before it is persisted and build its matcher.
pub fn validate_rule(rule: &SuppressionRule) -> Result<Option<MatchSpec>, NoiseError> {
    if rule.name.trim().is_empty() {
        return Err(NoiseError::InvalidRule("name must not be empty".into()));
    }
    if matches!(rule.device_id.as_deref(), Some(d) if d.trim().is_empty()) {
        return Err(NoiseError::InvalidRule("device_id must not be blank".into()));
    }
    if let (Some(start), Some(end)) = (rule.start_time, rule.end_time) {
        if start > end {
            return Err(NoiseError::InvalidRule(format!(
                "start_time {} is after end_time {}",
                start, end
            )));
        }
    }
    if let Some(days) = &rule.days_of_week {
        if days.is_empty() {
            return Err(NoiseError::InvalidRule("days_of_week must not be empty".into()));
        }
        if let Some(bad) = days.iter().find(|&&d| d > 6) {
            return Err(NoiseError::InvalidRule(format!(
                "days_of_week entries must be 0..=6, got {}",
                bad
            )));
        }
    }

    let matcher = match rule.alert_pattern.as_deref() {
        Some(p) if p.is_empty() => {
            return Err(NoiseError::InvalidRule("alert_pattern must not be empty".into()))
        }
        Some(p) => Some(MatchSpec::for_rule(rule.rule_type, p)?),
        None if rule.rule_type == RuleType::Regex => {
            return Err(NoiseError::InvalidRule("regex rules need an alert_pattern".into()))
        }
        None => None,
    };

    if rule.device_id.is_none()
        && rule.start_time.is_none()
        && rule.end_time.is_none()
        && rule.days_of_week.is_none()
        && matcher.is_none()
    {
        warn!(rule = %rule.name, "unscoped suppression rule will suppress every alert while active");
    }

    Ok(matcher)
}

/// A rule paired with its compiled matcher.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: SuppressionRule,
    matcher: Option<MatchSpec>,
}

impl CompiledRule {
    pub fn compile(rule: SuppressionRule) -> Result<Self, NoiseError> {
        let matcher = validate_rule(&rule)?;
        Ok(Self { rule, matcher })
    }

    /// True when every constraint present on the rule holds for `candidate`
    /// at the candidate's timestamp.
    pub fn matches(&self, candidate: &AlertCandidate) -> bool {
        let rule = &self.rule;
        if !rule.is_active {
            return false;
        }
        if let Some(device) = &rule.device_id {
            if device != &candidate.device_id {
                return false;
            }
        }
        if !in_window(candidate.timestamp, rule.start_time, rule.end_time) {
            return false;
        }
        if let Some(days) = &rule.days_of_week {
            let today = candidate.timestamp.weekday().num_days_from_monday() as u8;
            if !days.contains(&today) {
                return false;
            }
        }
        match &self.matcher {
            Some(m) => m.is_match(&candidate.alert_type) || m.is_match(&candidate.message),
            None => true,
        }
    }
}

fn in_window(now: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.map_or(true, |s| s <= now) && end.map_or(true, |e| now <= e)
}

/// An immutable view of the active rules.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    pub rules: Vec<CompiledRule>,
    pub loaded_at: Option<Instant>,
}

impl RuleSnapshot {
    pub fn first_match(&self, candidate: &AlertCandidate) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.matches(candidate))
    }
}

/// TTL-refreshed rule snapshot, replaced wholesale with one pointer swap.
///
/// Readers always see a complete snapshot. Refreshes are serialized so a
/// burst of decisions on a stale cache reloads the store once.
pub struct RuleCache {
    current: ArcSwap<RuleSnapshot>,
    ttl: Duration,
    forced: AtomicBool,
    refresh_lock: tokio::sync::Mutex<()>,
    reloads: AtomicU64,
}

impl RuleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleSnapshot::default()),
            ttl,
            forced: AtomicBool::new(false),
            refresh_lock: tokio::sync::Mutex::new(()),
            reloads: AtomicU64::new(0),
        }
    }

    /// The published snapshot, without checking freshness.
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Number of successful store reloads so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    pub fn is_stale(&self) -> bool {
        if self.forced.load(Ordering::Acquire) {
            return true;
        }
        match self.current.load().loaded_at {
            Some(at) => at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Make the next read reload regardless of the TTL.
    pub fn invalidate(&self) {
        self.forced.store(true, Ordering::Release);
    }

    /// Return a fresh snapshot, reloading from `store` if stale. A failed
    /// reload keeps serving the previous snapshot.
    pub async fn current(&self, store: &dyn SuppressionRuleStore) -> Arc<RuleSnapshot> {
        if !self.is_stale() {
            return self.snapshot();
        }
        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while we waited.
        if self.is_stale() {
            self.reload(store).await;
        }
        self.snapshot()
    }

    /// Reload now, ignoring the TTL. Returns whether the reload succeeded.
    pub async fn refresh(&self, store: &dyn SuppressionRuleStore) -> bool {
        let _guard = self.refresh_lock.lock().await;
        self.reload(store).await
    }

    async fn reload(&self, store: &dyn SuppressionRuleStore) -> bool {
        let was_forced = self.forced.swap(false, Ordering::AcqRel);
        match store.list_active().await {
            Ok(rules) => {
                let compiled: Vec<CompiledRule> = rules
                    .into_iter()
                    .filter_map(|rule| {
                        let name = rule.name.clone();
                        CompiledRule::compile(rule)
                            .map_err(|e| warn!(rule = %name, "Skipping unusable stored rule: {}", e))
                            .ok()
                    })
                    .collect();
                debug!(rules = compiled.len(), "rule cache refreshed");
                self.current.store(Arc::new(RuleSnapshot {
                    rules: compiled,
                    loaded_at: Some(Instant::now()),
                }));
                self.reloads.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                if was_forced {
                    self.forced.store(true, Ordering::Release);
                }
                warn!(
                    kept = self.current.load().rules.len(),
                    "Rule refresh failed, keeping previous snapshot: {}",
                    e
                );
                false
            }
        }
    }
}
