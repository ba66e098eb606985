//! SQLite-backed implementation of the store traits.
//!
//! Queries run on the blocking pool, one pooled connection per call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::alert::AlertCandidate;
use crate::forecast::{MetricSample, Prediction};
use crate::noise::{AlertHistoryEntry, AlertRecord, RuleFilter, SuppressionRule};
use crate::storage::{
    fmt_ts, parse_ts, window_start, AlertHistoryStore, AlertStore, HistoricalMetricStore, Pool,
    PredictionStore, SuppressionRuleStore, SuppressionSummary,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let conn = pool.get().context("Failed to get DB connection")?;
            f(&conn)
        })
        .await?
    }

    /// Store one metric observation.
    pub async fn insert_sample(&self, sample: &MetricSample) -> Result<()> {
        let sample = sample.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO metric_samples (device_id, metric_name, value, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sample.device_id,
                    sample.metric_name,
                    sample.value,
                    fmt_ts(&sample.timestamp)
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Store a raised alert so it can later be marked suppressed or counted
    /// as flapping history.
    pub async fn insert_alert(&self, alert_id: &str, candidate: &AlertCandidate, status: &str) -> Result<()> {
        let alert_id = alert_id.to_string();
        let candidate = candidate.clone();
        let status = status.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO alerts (id, device_id, alert_type, message, severity, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    alert_id,
                    candidate.device_id,
                    candidate.alert_type,
                    candidate.message,
                    candidate.severity.to_string(),
                    status,
                    fmt_ts(&candidate.timestamp)
                ],
            )
            .context("Failed to insert alert")?;
            Ok(())
        })
        .await
    }

    /// Number of stored predictions for one series.
    pub async fn prediction_count(&self, device_id: &str, metric_name: &str) -> Result<i64> {
        let device_id = device_id.to_string();
        let metric_name = metric_name.to_string();
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM predictions WHERE device_id = ?1 AND metric_name = ?2",
                params![device_id, metric_name],
                |row| row.get(0),
            )?)
        })
        .await
    }
}

const RULE_COLUMNS: &str = "id, name, rule_type, device_id, alert_pattern, start_time, end_time,
     days_of_week, is_active, created_by, metadata_json, created_at, updated_at";

/// Raw column values; decoded outside the rusqlite row callback so parse
/// failures surface as errors instead of panics.
struct RuleRow {
    id: String,
    name: String,
    rule_type: String,
    device_id: Option<String>,
    alert_pattern: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    days_of_week: Option<String>,
    is_active: i64,
    created_by: String,
    metadata_json: String,
    created_at: String,
    updated_at: String,
}

impl RuleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            rule_type: row.get(2)?,
            device_id: row.get(3)?,
            alert_pattern: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            days_of_week: row.get(7)?,
            is_active: row.get(8)?,
            created_by: row.get(9)?,
            metadata_json: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_rule(self) -> Result<SuppressionRule> {
        Ok(SuppressionRule {
            id: Uuid::parse_str(&self.id).with_context(|| format!("bad rule id '{}'", self.id))?,
            rule_type: self.rule_type.parse()?,
            start_time: self.start_time.as_deref().map(parse_ts).transpose()?,
            end_time: self.end_time.as_deref().map(parse_ts).transpose()?,
            days_of_week: self
                .days_of_week
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("bad days_of_week")?,
            metadata: serde_json::from_str(&self.metadata_json).context("bad metadata_json")?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            name: self.name,
            device_id: self.device_id,
            alert_pattern: self.alert_pattern,
            is_active: self.is_active != 0,
            created_by: self.created_by,
        })
    }
}

fn rule_params(rule: &SuppressionRule) -> Result<[Box<dyn rusqlite::ToSql + Send>; 13]> {
    let days = rule.days_of_week.as_ref().map(serde_json::to_string).transpose()?;
    let values: [Box<dyn rusqlite::ToSql + Send>; 13] = [
        Box::new(rule.id.to_string()),
        Box::new(rule.name.clone()),
        Box::new(rule.rule_type.to_string()),
        Box::new(rule.device_id.clone()),
        Box::new(rule.alert_pattern.clone()),
        Box::new(rule.start_time.as_ref().map(fmt_ts)),
        Box::new(rule.end_time.as_ref().map(fmt_ts)),
        Box::new(days),
        Box::new(rule.is_active as i64),
        Box::new(rule.created_by.clone()),
        Box::new(serde_json::to_string(&rule.metadata)?),
        Box::new(fmt_ts(&rule.created_at)),
        Box::new(fmt_ts(&rule.updated_at)),
    ];
    Ok(values)
}

fn query_rules(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<SuppressionRule>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, RuleRow::from_row)?;
    let mut rules = Vec::new();
    for r in rows {
        rules.push(r?.into_rule()?);
    }
    Ok(rules)
}

#[async_trait]
impl HistoricalMetricStore for SqliteStore {
    async fn samples(&self, device_id: &str, metric_name: &str, days: u32) -> Result<Vec<MetricSample>> {
        let device_id = device_id.to_string();
        let metric_name = metric_name.to_string();
        let since = fmt_ts(&window_start(Utc::now(), Duration::days(i64::from(days))));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT value, recorded_at FROM metric_samples
                 WHERE device_id = ?1 AND metric_name = ?2 AND recorded_at >= ?3
                 ORDER BY recorded_at ASC",
            )?;
            let rows = stmt.query_map(params![device_id, metric_name, since], |row| {
                Ok((row.get::<_, f64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut samples = Vec::new();
            for r in rows {
                let (value, ts) = r?;
                samples.push(MetricSample {
                    device_id: device_id.clone(),
                    metric_name: metric_name.clone(),
                    timestamp: parse_ts(&ts)?,
                    value,
                });
            }
            Ok(samples)
        })
        .await
    }
}

#[async_trait]
impl AlertHistoryStore for SqliteStore {
    async fn recent(
        &self,
        device_id: &str,
        alert_type: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AlertHistoryEntry>> {
        let device_id = device_id.to_string();
        let alert_type = alert_type.to_string();
        let since = fmt_ts(&since);
        let until = fmt_ts(&until);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, created_at, resolved_at FROM alerts
                 WHERE device_id = ?1 AND alert_type = ?2 AND created_at >= ?3 AND created_at <= ?4
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![device_id, alert_type, since, until], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;

            let mut history = Vec::new();
            for r in rows {
                let (status, created_at, resolved_at) = r?;
                history.push(AlertHistoryEntry {
                    status,
                    created_at: parse_ts(&created_at)?,
                    resolved_at: resolved_at.as_deref().map(parse_ts).transpose()?,
                });
            }
            Ok(history)
        })
        .await
    }

    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<AlertRecord>> {
        let since = fmt_ts(&since);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT device_id, alert_type, status, created_at, resolved_at FROM alerts
                 WHERE created_at >= ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;

            let mut records = Vec::new();
            for r in rows {
                let (device_id, alert_type, status, created_at, resolved_at) = r?;
                records.push(AlertRecord {
                    device_id,
                    alert_type,
                    status,
                    created_at: parse_ts(&created_at)?,
                    resolved_at: resolved_at.as_deref().map(parse_ts).transpose()?,
                });
            }
            Ok(records)
        })
        .await
    }
}

#[async_trait]
impl SuppressionRuleStore for SqliteStore {
    async fn create(&self, rule: &SuppressionRule) -> Result<()> {
        let values = rule_params(rule)?;
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO suppression_rules ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    RULE_COLUMNS
                ),
                rusqlite::params_from_iter(values.iter()),
            )
            .context("Failed to insert suppression rule")?;
            Ok(())
        })
        .await
    }

    async fn update(&self, rule: &SuppressionRule) -> Result<bool> {
        let values = rule_params(rule)?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE suppression_rules SET
                    name = ?2, rule_type = ?3, device_id = ?4, alert_pattern = ?5,
                    start_time = ?6, end_time = ?7, days_of_week = ?8, is_active = ?9,
                    created_by = ?10, metadata_json = ?11, created_at = ?12, updated_at = ?13
                 WHERE id = ?1",
                rusqlite::params_from_iter(values.iter()),
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM suppression_rules WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<SuppressionRule>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM suppression_rules WHERE id = ?1", RULE_COLUMNS),
                params![id.to_string()],
                RuleRow::from_row,
            )
            .optional()?
            .map(RuleRow::into_rule)
            .transpose()
        })
        .await
    }

    async fn list(&self, filter: &RuleFilter) -> Result<Vec<SuppressionRule>> {
        let device_id = filter.device_id.clone();
        let rule_type = filter.rule_type.map(|t| t.to_string());
        let active_only = filter.active_only as i64;
        self.with_conn(move |conn| {
            query_rules(
                conn,
                &format!(
                    "SELECT {} FROM suppression_rules
                     WHERE (?1 IS NULL OR device_id = ?1)
                       AND (?2 IS NULL OR rule_type = ?2)
                       AND (?3 = 0 OR is_active = 1)
                     ORDER BY created_at ASC",
                    RULE_COLUMNS
                ),
                params![device_id, rule_type, active_only],
            )
        })
        .await
    }

    async fn list_active(&self) -> Result<Vec<SuppressionRule>> {
        self.with_conn(|conn| {
            query_rules(
                conn,
                &format!(
                    "SELECT {} FROM suppression_rules WHERE is_active = 1 ORDER BY created_at ASC",
                    RULE_COLUMNS
                ),
                [],
            )
        })
        .await
    }
}

#[async_trait]
impl PredictionStore for SqliteStore {
    async fn append(&self, prediction: &Prediction) -> Result<()> {
        let p = prediction.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO predictions (
                    device_id, metric_name, horizon_minutes, predicted_value,
                    ci_lower, ci_upper, confidence_level, model_type, predicted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    p.device_id,
                    p.metric_name,
                    p.horizon_minutes,
                    p.predicted_value,
                    p.ci_lower,
                    p.ci_upper,
                    p.confidence_level,
                    p.model_type.to_string(),
                    fmt_ts(&p.predicted_at)
                ],
            )
            .context("Failed to save prediction")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AlertStore for SqliteStore {
    async fn mark_suppressed(&self, alert_id: &str, reason: &str, noise_score: f64) -> Result<()> {
        let alert_id = alert_id.to_string();
        let reason = reason.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE alerts SET suppressed = 1, suppression_reason = ?2, noise_score = ?3 WHERE id = ?1",
                params![alert_id, reason, noise_score],
            )?;
            if changed == 0 {
                anyhow::bail!("Alert '{}' not found", alert_id);
            }
            Ok(())
        })
        .await
    }

    async fn suppression_summary(&self, since: DateTime<Utc>) -> Result<SuppressionSummary> {
        let since = fmt_ts(&since);
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM alerts WHERE created_at >= ?1",
                params![since],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT COALESCE(suppression_reason, 'unknown'), COUNT(*) FROM alerts
                 WHERE created_at >= ?1 AND suppressed = 1
                 GROUP BY 1",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut summary = SuppressionSummary {
                total: total as u64,
                ..Default::default()
            };
            for r in rows {
                let (reason, count) = r?;
                summary.by_reason.insert(reason, count as u64);
            }
            Ok(summary)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Severity;
    use crate::forecast::ModelType;
    use crate::noise::{Metadata, MetadataValue, RuleType};
    use crate::storage::open_pool;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("test.db")).unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn rule(name: &str, device: Option<&str>, active: bool) -> SuppressionRule {
        let now = Utc::now();
        let mut metadata = Metadata::new();
        metadata.insert("ticket".into(), MetadataValue::Text("OPS-7".into()));
        metadata.insert(
            "tags".into(),
            MetadataValue::List(vec![MetadataValue::Text("db".into()), MetadataValue::Number(3.0)]),
        );
        SuppressionRule {
            id: Uuid::new_v4(),
            name: name.into(),
            rule_type: RuleType::Schedule,
            device_id: device.map(String::from),
            alert_pattern: Some("backup".into()),
            start_time: Some(now - Duration::hours(1)),
            end_time: None,
            days_of_week: Some(vec![0, 2, 4]),
            is_active: active,
            created_by: "ops".into(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_rule_crud_round_trip() -> Result<()> {
        let (_dir, store) = store();
        let mut r = rule("nightly", Some("D1"), true);
        store.create(&r).await?;

        let loaded = store.get(r.id).await?.expect("rule should exist");
        assert_eq!(loaded.name, "nightly");
        assert_eq!(loaded.days_of_week, Some(vec![0, 2, 4]));
        assert_eq!(loaded.metadata, r.metadata);
        assert_eq!(loaded.rule_type, RuleType::Schedule);

        r.is_active = false;
        r.alert_pattern = None;
        assert!(store.update(&r).await?);
        assert!(store.list_active().await?.is_empty());
        assert_eq!(store.get(r.id).await?.unwrap().alert_pattern, None);

        assert!(store.delete(r.id).await?);
        assert!(!store.delete(r.id).await?);
        assert!(store.get(r.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_rule_filters() -> Result<()> {
        let (_dir, store) = store();
        store.create(&rule("a", Some("D1"), true)).await?;
        store.create(&rule("b", Some("D2"), false)).await?;
        store.create(&rule("c", None, true)).await?;

        assert_eq!(store.list(&RuleFilter::default()).await?.len(), 3);
        let d1 = store
            .list(&RuleFilter { device_id: Some("D1".into()), ..Default::default() })
            .await?;
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].name, "a");
        let active = store
            .list(&RuleFilter { active_only: true, ..Default::default() })
            .await?;
        assert_eq!(active.len(), 2);
        let maint = store
            .list(&RuleFilter { rule_type: Some(RuleType::Maintenance), ..Default::default() })
            .await?;
        assert!(maint.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_samples_ordered_and_windowed() -> Result<()> {
        let (_dir, store) = store();
        let now = Utc::now();
        for (hours_ago, value) in [(3, 30.0), (1, 10.0), (2, 20.0), (24 * 10, 99.0)] {
            store
                .insert_sample(&MetricSample {
                    device_id: "D1".into(),
                    metric_name: "disk_usage".into(),
                    timestamp: now - Duration::hours(hours_ago),
                    value,
                })
                .await?;
        }
        let samples = store.samples("D1", "disk_usage", 7).await?;
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![30.0, 20.0, 10.0]);
        assert!(store.samples("D2", "disk_usage", 7).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_alert_history_and_suppression_summary() -> Result<()> {
        let (_dir, store) = store();
        let now = Utc::now();
        for i in 0..4 {
            let c = AlertCandidate::new("D1", "link_down", "eth0", Severity::Error)
                .at(now - Duration::minutes(i * 5));
            let status = if i % 2 == 0 { "active" } else { "resolved" };
            store.insert_alert(&format!("a-{}", i), &c, status).await?;
        }

        let history = store
            .recent("D1", "link_down", now - Duration::minutes(12), now)
            .await?;
        assert_eq!(history.len(), 3);
        assert!(history[0].created_at > history[1].created_at);
        assert_eq!(history[0].status, "active");

        // Rows after the upper bound are excluded.
        let earlier = store
            .recent("D1", "link_down", now - Duration::hours(1), now - Duration::minutes(6))
            .await?;
        assert_eq!(earlier.len(), 2);
        assert_eq!(earlier[0].created_at.timestamp_micros(), (now - Duration::minutes(10)).timestamp_micros());

        assert_eq!(store.since(now - Duration::hours(1)).await?.len(), 4);

        store.mark_suppressed("a-1", "duplicate_alert", 0.9).await?;
        store.mark_suppressed("a-2", "duplicate_alert", 0.9).await?;
        assert!(store.mark_suppressed("missing", "rate_limited", 0.7).await.is_err());

        let summary = store.suppression_summary(now - Duration::hours(1)).await?;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_reason.get("duplicate_alert"), Some(&2));
        Ok(())
    }

    #[tokio::test]
    async fn test_append_prediction() -> Result<()> {
        let (_dir, store) = store();
        let p = Prediction {
            device_id: "D1".into(),
            metric_name: "cpu".into(),
            horizon_minutes: 60,
            predicted_value: 42.0,
            ci_lower: 40.0,
            ci_upper: 44.0,
            confidence_level: 0.95,
            model_type: ModelType::Linear,
            predicted_at: Utc::now(),
        };
        store.append(&p).await?;
        store.append(&p).await?;
        assert_eq!(store.prediction_count("D1", "cpu").await?, 2);
        Ok(())
    }
}
