use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::{AlertCandidate, Severity};
use crate::config::NoiseConfig;
use crate::noise::flapping::{find_flapping, is_flapping, FlappingAlert};
use crate::noise::rules::{validate_rule, RuleCache};
use crate::noise::window::AlertWindows;
use crate::noise::{
    NewSuppressionRule, NoiseError, RuleFilter, RuleUpdate, SuppressReason, SuppressionDecision,
    SuppressionRule,
};
use crate::storage::{window_start, AlertHistoryStore, AlertStore, SuppressionRuleStore};

/// Suppressed-vs-total counts over a reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoiseReductionStats {
    pub period_hours: u32,
    pub total_alerts: u64,
    pub suppressed_alerts: u64,
    pub admitted_alerts: u64,
    /// Percentage of alerts suppressed.
    pub suppression_rate: f64,
    pub by_reason: BTreeMap<String, u64>,
}

/// Decides whether a candidate alert reaches an operator.
///
/// Checks run in fixed precedence, stopping at the first hit: suppression
/// rules, duplicates, rate limit, flapping. The dedup and rate-limit state
/// is local to this instance.
pub struct NoiseReductionEngine {
    rule_store: Arc<dyn SuppressionRuleStore>,
    history: Arc<dyn AlertHistoryStore>,
    alerts: Arc<dyn AlertStore>,
    config: NoiseConfig,
    rules: RuleCache,
    windows: Mutex<AlertWindows>,
}

impl NoiseReductionEngine {
    pub fn new(
        rule_store: Arc<dyn SuppressionRuleStore>,
        history: Arc<dyn AlertHistoryStore>,
        alerts: Arc<dyn AlertStore>,
        config: NoiseConfig,
    ) -> Self {
        Self {
            rules: RuleCache::new(config.cache_ttl()),
            windows: Mutex::new(AlertWindows::new(&config)),
            rule_store,
            history,
            alerts,
            config,
        }
    }

    /// Evaluate a candidate built from its parts, stamped now.
    pub async fn should_suppress_alert(
        &self,
        device_id: &str,
        alert_type: &str,
        message: &str,
        severity: Severity,
    ) -> SuppressionDecision {
        self.evaluate(&AlertCandidate::new(device_id, alert_type, message, severity))
            .await
    }

    /// Produce exactly one decision for `candidate`. Never fails: store
    /// problems are logged and the alert is admitted.
    pub async fn evaluate(&self, candidate: &AlertCandidate) -> SuppressionDecision {
        let snapshot = self.rules.current(self.rule_store.as_ref()).await;
        if let Some(hit) = snapshot.first_match(candidate) {
            debug!(device = %candidate.device_id, rule = %hit.rule.name, "suppressed by rule");
            return SuppressionDecision::suppress(SuppressReason::Rule(hit.rule.name.clone()));
        }

        // Lock scope holds no await point.
        let windowed = self.windows.lock().check(candidate);
        if let Some(reason) = windowed {
            return SuppressionDecision::suppress(reason);
        }

        if self.is_flapping(candidate).await {
            debug!(device = %candidate.device_id, alert_type = %candidate.alert_type, "suppressed as flapping");
            return SuppressionDecision::suppress(SuppressReason::Flapping);
        }

        SuppressionDecision::admit()
    }

    async fn is_flapping(&self, candidate: &AlertCandidate) -> bool {
        let since = window_start(candidate.timestamp, self.config.flapping_window());
        match self
            .history
            .recent(&candidate.device_id, &candidate.alert_type, since, candidate.timestamp)
            .await
        {
            Ok(history) => is_flapping(&history, self.config.flapping_threshold),
            Err(e) => {
                warn!(
                    device = %candidate.device_id,
                    alert_type = %candidate.alert_type,
                    "Flapping lookup failed, admitting alert: {}",
                    e
                );
                false
            }
        }
    }

    /// Evaluate a stored alert and record the outcome when it is suppressed.
    /// Recording is best-effort; the returned decision stands regardless.
    pub async fn process_alert(&self, alert_id: &str, candidate: &AlertCandidate) -> SuppressionDecision {
        let decision = self.evaluate(candidate).await;
        if let Some(reason) = &decision.reason {
            let reason_str = reason.to_string();
            if let Err(e) = self
                .alerts
                .mark_suppressed(alert_id, &reason_str, reason.noise_score())
                .await
            {
                warn!(alert_id, reason = %reason_str, "Failed to record suppression: {}", e);
            }
        }
        decision
    }

    // -----------------------------------------------------------------------
    // Rule management. Every mutation republishes the rule cache so the next
    // decision sees it.
    // -----------------------------------------------------------------------

    pub async fn create_suppression_rule(
        &self,
        input: NewSuppressionRule,
    ) -> Result<SuppressionRule, NoiseError> {
        let now = Utc::now();
        let rule = SuppressionRule {
            id: Uuid::new_v4(),
            name: input.name,
            rule_type: input.rule_type,
            device_id: input.device_id,
            alert_pattern: input.alert_pattern,
            start_time: input.start_time,
            end_time: input.end_time,
            days_of_week: input.days_of_week,
            is_active: input.is_active,
            created_by: input.created_by,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        };
        validate_rule(&rule)?;
        self.rule_store.create(&rule).await?;
        info!(rule = %rule.name, id = %rule.id, rule_type = %rule.rule_type, "suppression rule created");
        self.republish_rules().await;
        Ok(rule)
    }

    pub async fn update_suppression_rule(
        &self,
        id: Uuid,
        update: RuleUpdate,
    ) -> Result<SuppressionRule, NoiseError> {
        let mut rule = self
            .rule_store
            .get(id)
            .await?
            .ok_or(NoiseError::RuleNotFound(id))?;
        update.apply(&mut rule);
        rule.updated_at = Utc::now();
        validate_rule(&rule)?;
        if !self.rule_store.update(&rule).await? {
            return Err(NoiseError::RuleNotFound(id));
        }
        info!(rule = %rule.name, %id, "suppression rule updated");
        self.republish_rules().await;
        Ok(rule)
    }

    pub async fn delete_suppression_rule(&self, id: Uuid) -> Result<(), NoiseError> {
        if !self.rule_store.delete(id).await? {
            return Err(NoiseError::RuleNotFound(id));
        }
        info!(%id, "suppression rule deleted");
        self.republish_rules().await;
        Ok(())
    }

    pub async fn get_suppression_rules(&self, filter: &RuleFilter) -> Result<Vec<SuppressionRule>, NoiseError> {
        Ok(self.rule_store.list(filter).await?)
    }

    async fn republish_rules(&self) {
        self.rules.invalidate();
        if !self.rules.refresh(self.rule_store.as_ref()).await {
            warn!("Rule cache refresh after mutation failed; next decision will retry");
        }
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    /// Scan the last `hours` of history across every device for oscillating
    /// alerts. Empty when the history store is unavailable.
    pub async fn detect_flapping_alerts(&self, hours: u32) -> Vec<FlappingAlert> {
        let since = window_start(Utc::now(), Duration::hours(i64::from(hours)));
        match self.history.since(since).await {
            Ok(records) => {
                let found = find_flapping(&records, self.config.flapping_threshold, f64::from(hours));
                info!(hours, scanned = records.len(), flapping = found.len(), "flapping scan complete");
                found
            }
            Err(e) => {
                warn!(hours, "Flapping scan failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn get_noise_reduction_stats(&self, hours: u32) -> Result<NoiseReductionStats, NoiseError> {
        let since = window_start(Utc::now(), Duration::hours(i64::from(hours)));
        let summary = self.alerts.suppression_summary(since).await?;
        let suppressed: u64 = summary.by_reason.values().sum();
        let total = summary.total.max(suppressed);
        let suppression_rate = if total == 0 {
            0.0
        } else {
            suppressed as f64 / total as f64 * 100.0
        };
        Ok(NoiseReductionStats {
            period_hours: hours,
            total_alerts: total,
            suppressed_alerts: suppressed,
            admitted_alerts: total - suppressed,
            suppression_rate,
            by_reason: summary.by_reason,
        })
    }
}
