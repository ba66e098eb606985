//! In-process store implementing every collaborator trait.
//!
//! Used for dry runs and tests. Reads and writes can be made to fail on
//! demand to exercise the engines' fail-open and fail-empty paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::forecast::{MetricSample, Prediction};
use crate::noise::{AlertHistoryEntry, AlertRecord, RuleFilter, SuppressionRule};
use crate::storage::{
    window_start, AlertHistoryStore, AlertStore, HistoricalMetricStore, PredictionStore,
    SuppressionRuleStore, SuppressionSummary,
};

#[derive(Default)]
struct Inner {
    samples: Vec<MetricSample>,
    alerts: Vec<AlertRecord>,
    rules: Vec<SuppressionRule>,
    predictions: Vec<Prediction>,
    suppressed: Vec<(String, String, f64, DateTime<Utc>)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    rule_loads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_sample(&self, sample: MetricSample) {
        self.inner.lock().samples.push(sample);
    }

    pub fn push_alert_record(&self, record: AlertRecord) {
        self.inner.lock().alerts.push(record);
    }

    pub fn predictions(&self) -> Vec<Prediction> {
        self.inner.lock().predictions.clone()
    }

    /// (alert id, reason, noise score) for every recorded suppression.
    pub fn suppressed(&self) -> Vec<(String, String, f64)> {
        self.inner
            .lock()
            .suppressed
            .iter()
            .map(|(id, reason, score, _)| (id.clone(), reason.clone(), *score))
            .collect()
    }

    /// Calls to `list_active`, including failed ones.
    pub fn rule_loads(&self) -> u64 {
        self.rule_loads.load(Ordering::Relaxed)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            bail!("memory store: reads disabled");
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            bail!("memory store: writes disabled");
        }
        Ok(())
    }
}

#[async_trait]
impl HistoricalMetricStore for MemoryStore {
    async fn samples(&self, device_id: &str, metric_name: &str, days: u32) -> Result<Vec<MetricSample>> {
        self.check_read()?;
        let since = window_start(Utc::now(), Duration::days(i64::from(days)));
        let mut out: Vec<MetricSample> = self
            .inner
            .lock()
            .samples
            .iter()
            .filter(|s| s.device_id == device_id && s.metric_name == metric_name && s.timestamp >= since)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.timestamp);
        Ok(out)
    }
}

#[async_trait]
impl AlertHistoryStore for MemoryStore {
    async fn recent(
        &self,
        device_id: &str,
        alert_type: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AlertHistoryEntry>> {
        self.check_read()?;
        let mut rows: Vec<AlertRecord> = self
            .inner
            .lock()
            .alerts
            .iter()
            .filter(|a| {
                a.device_id == device_id
                    && a.alert_type == alert_type
                    && a.created_at >= since
                    && a.created_at <= until
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .map(|a| AlertHistoryEntry {
                status: a.status,
                created_at: a.created_at,
                resolved_at: a.resolved_at,
            })
            .collect())
    }

    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<AlertRecord>> {
        self.check_read()?;
        let mut rows: Vec<AlertRecord> = self
            .inner
            .lock()
            .alerts
            .iter()
            .filter(|a| a.created_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl SuppressionRuleStore for MemoryStore {
    async fn create(&self, rule: &SuppressionRule) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.lock();
        if inner.rules.iter().any(|r| r.id == rule.id) {
            bail!("rule {} already exists", rule.id);
        }
        inner.rules.push(rule.clone());
        Ok(())
    }

    async fn update(&self, rule: &SuppressionRule) -> Result<bool> {
        self.check_write()?;
        let mut inner = self.inner.lock();
        match inner.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => {
                *slot = rule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.check_write()?;
        let mut inner = self.inner.lock();
        let before = inner.rules.len();
        inner.rules.retain(|r| r.id != id);
        Ok(inner.rules.len() != before)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SuppressionRule>> {
        self.check_read()?;
        Ok(self.inner.lock().rules.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, filter: &RuleFilter) -> Result<Vec<SuppressionRule>> {
        self.check_read()?;
        Ok(self
            .inner
            .lock()
            .rules
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<SuppressionRule>> {
        self.rule_loads.fetch_add(1, Ordering::Relaxed);
        self.check_read()?;
        Ok(self
            .inner
            .lock()
            .rules
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn append(&self, prediction: &Prediction) -> Result<()> {
        self.check_write()?;
        self.inner.lock().predictions.push(prediction.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn mark_suppressed(&self, alert_id: &str, reason: &str, noise_score: f64) -> Result<()> {
        self.check_write()?;
        self.inner
            .lock()
            .suppressed
            .push((alert_id.to_string(), reason.to_string(), noise_score, Utc::now()));
        Ok(())
    }

    async fn suppression_summary(&self, since: DateTime<Utc>) -> Result<SuppressionSummary> {
        self.check_read()?;
        let inner = self.inner.lock();
        let mut summary = SuppressionSummary {
            total: inner.alerts.iter().filter(|a| a.created_at >= since).count() as u64,
            ..Default::default()
        };
        for (_, reason, _, at) in &inner.suppressed {
            if *at >= since {
                *summary.by_reason.entry(reason.clone()).or_default() += 1;
            }
        }
        Ok(summary)
    }
}
