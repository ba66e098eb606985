//! Alert noise reduction: suppression rules, duplicate and rate-limit
//! windows, and flapping detection.

pub mod engine;
pub mod flapping;
pub mod rules;
pub mod window;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use self::engine::{NoiseReductionEngine, NoiseReductionStats};
pub use self::flapping::FlappingAlert;
pub use self::rules::{MatchSpec, RuleCache};

#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("invalid suppression rule: {0}")]
    InvalidRule(String),
    #[error("suppression rule {0} not found")]
    RuleNotFound(Uuid),
    #[error("rule store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Maintenance,
    KnownIssue,
    Schedule,
    Regex,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleType::Maintenance => write!(f, "maintenance"),
            RuleType::KnownIssue => write!(f, "known_issue"),
            RuleType::Schedule => write!(f, "schedule"),
            RuleType::Regex => write!(f, "regex"),
        }
    }
}

impl std::str::FromStr for RuleType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maintenance" => Ok(RuleType::Maintenance),
            "known_issue" => Ok(RuleType::KnownIssue),
            "schedule" => Ok(RuleType::Schedule),
            "regex" => Ok(RuleType::Regex),
            other => anyhow::bail!("unknown rule type '{}'", other),
        }
    }
}

/// Free-form rule annotations: primitives, lists and nested maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A stored suppression rule. Every present constraint must hold for a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionRule {
    pub id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    pub device_id: Option<String>,
    pub alert_pattern: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// 0 = Monday .. 6 = Sunday.
    pub days_of_week: Option<Vec<u8>>,
    pub is_active: bool,
    pub created_by: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator input for creating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSuppressionRule {
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub alert_pattern: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub days_of_week: Option<Vec<u8>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_by: String,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_active() -> bool {
    true
}

impl NewSuppressionRule {
    pub fn new(name: impl Into<String>, rule_type: RuleType, created_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule_type,
            device_id: None,
            alert_pattern: None,
            start_time: None,
            end_time: None,
            days_of_week: None,
            is_active: true,
            created_by: created_by.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Partial update. Outer `None` leaves a field unchanged; for optional
/// fields, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub rule_type: Option<RuleType>,
    pub device_id: Option<Option<String>>,
    pub alert_pattern: Option<Option<String>>,
    pub start_time: Option<Option<DateTime<Utc>>>,
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub days_of_week: Option<Option<Vec<u8>>>,
    pub is_active: Option<bool>,
    pub metadata: Option<Metadata>,
}

impl RuleUpdate {
    pub(crate) fn apply(self, rule: &mut SuppressionRule) {
        if let Some(v) = self.name {
            rule.name = v;
        }
        if let Some(v) = self.rule_type {
            rule.rule_type = v;
        }
        if let Some(v) = self.device_id {
            rule.device_id = v;
        }
        if let Some(v) = self.alert_pattern {
            rule.alert_pattern = v;
        }
        if let Some(v) = self.start_time {
            rule.start_time = v;
        }
        if let Some(v) = self.end_time {
            rule.end_time = v;
        }
        if let Some(v) = self.days_of_week {
            rule.days_of_week = v;
        }
        if let Some(v) = self.is_active {
            rule.is_active = v;
        }
        if let Some(v) = self.metadata {
            rule.metadata = v;
        }
    }
}

/// Filters for listing rules. Empty filter lists everything.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub device_id: Option<String>,
    pub rule_type: Option<RuleType>,
    pub active_only: bool,
}

impl RuleFilter {
    pub fn matches(&self, rule: &SuppressionRule) -> bool {
        if self.active_only && !rule.is_active {
            return false;
        }
        if let Some(device) = &self.device_id {
            if rule.device_id.as_deref() != Some(device.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.rule_type {
            if rule.rule_type != kind {
                return false;
            }
        }
        true
    }
}

/// Why a candidate was withheld.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SuppressReason {
    Rule(String),
    Duplicate,
    RateLimited,
    Flapping,
}

impl SuppressReason {
    /// How confidently the alert is judged to be noise.
    pub fn noise_score(&self) -> f64 {
        match self {
            SuppressReason::Rule(_) => 1.0,
            SuppressReason::Duplicate => 0.9,
            SuppressReason::Flapping => 0.8,
            SuppressReason::RateLimited => 0.7,
        }
    }
}

impl std::fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuppressReason::Rule(name) => write!(f, "rule:{}", name),
            SuppressReason::Duplicate => write!(f, "duplicate_alert"),
            SuppressReason::RateLimited => write!(f, "rate_limited"),
            SuppressReason::Flapping => write!(f, "flapping_detected"),
        }
    }
}

impl Serialize for SuppressReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuppressionDecision {
    pub suppress: bool,
    pub reason: Option<SuppressReason>,
}

impl SuppressionDecision {
    pub fn admit() -> Self {
        Self { suppress: false, reason: None }
    }

    pub fn suppress(reason: SuppressReason) -> Self {
        Self { suppress: true, reason: Some(reason) }
    }

    /// `(suppress, reason)` with the reason rendered as its wire string.
    pub fn as_pair(&self) -> (bool, Option<String>) {
        (self.suppress, self.reason.as_ref().map(ToString::to_string))
    }
}

/// One row of alert history for a single (device, alert type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// One row of alert history across all devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub device_id: String,
    pub alert_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        assert_eq!(SuppressReason::Rule("nightly".into()).to_string(), "rule:nightly");
        assert_eq!(SuppressReason::Duplicate.to_string(), "duplicate_alert");
        assert_eq!(SuppressReason::RateLimited.to_string(), "rate_limited");
        assert_eq!(SuppressReason::Flapping.to_string(), "flapping_detected");
        assert_eq!(
            SuppressionDecision::suppress(SuppressReason::Duplicate).as_pair(),
            (true, Some("duplicate_alert".to_string()))
        );
        assert_eq!(SuppressionDecision::admit().as_pair(), (false, None));
    }

    #[test]
    fn test_metadata_is_typed() {
        let meta: Metadata = serde_json::from_str(
            r#"{"ticket": "OPS-12", "priority": 2, "notify": false, "tags": ["db", "eu"],
                "owner": {"team": "storage"}, "note": null}"#,
        )
        .unwrap();
        assert_eq!(meta["ticket"], MetadataValue::Text("OPS-12".into()));
        assert_eq!(meta["priority"], MetadataValue::Number(2.0));
        assert_eq!(meta["notify"], MetadataValue::Bool(false));
        assert_eq!(meta["note"], MetadataValue::Null);
        assert!(matches!(&meta["tags"], MetadataValue::List(items) if items.len() == 2));
        assert!(matches!(&meta["owner"], MetadataValue::Map(m) if m.contains_key("team")));
    }

    #[test]
    fn test_rule_update_clears_and_sets() {
        let now = Utc::now();
        let mut rule = SuppressionRule {
            id: Uuid::new_v4(),
            name: "r".into(),
            rule_type: RuleType::KnownIssue,
            device_id: Some("D1".into()),
            alert_pattern: Some("disk".into()),
            start_time: None,
            end_time: None,
            days_of_week: None,
            is_active: true,
            created_by: "ops".into(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        };
        RuleUpdate {
            device_id: Some(None),
            is_active: Some(false),
            ..Default::default()
        }
        .apply(&mut rule);
        assert_eq!(rule.device_id, None);
        assert!(!rule.is_active);
        assert_eq!(rule.alert_pattern.as_deref(), Some("disk"));
    }
}
