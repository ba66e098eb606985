use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::ForecastConfig;
use crate::forecast::model::{forecast_with, select_model, ModelParams};
use crate::forecast::trend::predict_crossing;
use crate::forecast::{
    exhaustion_severity, ExhaustionWarning, MetricSample, Prediction, Threshold, ThresholdCrossing,
};
use crate::storage::{HistoricalMetricStore, PredictionStore};

/// Critical resources watched by [`ForecastEngine::detect_resource_exhaustion`].
pub const CRITICAL_METRICS: [(&str, f64); 3] = [
    ("disk_usage", 90.0),
    ("memory_usage", 95.0),
    ("connection_pool_usage", 90.0),
];

/// Store-backed forecasting operations.
///
/// Every operation is a read over historical samples. Store failures and
/// short histories produce empty results; prediction persistence is
/// best-effort and never affects what the caller receives.
pub struct ForecastEngine {
    metrics: Arc<dyn HistoricalMetricStore>,
    predictions: Arc<dyn PredictionStore>,
    config: ForecastConfig,
}

impl ForecastEngine {
    pub fn new(
        metrics: Arc<dyn HistoricalMetricStore>,
        predictions: Arc<dyn PredictionStore>,
        config: ForecastConfig,
    ) -> Self {
        Self {
            metrics,
            predictions,
            config,
        }
    }

    fn params(&self) -> ModelParams {
        ModelParams {
            min_samples: self.config.min_samples,
            alpha: self.config.smoothing_alpha,
        }
    }

    /// Load history, or `None` when it is unavailable or too short.
    async fn history(&self, device_id: &str, metric_name: &str) -> Option<Vec<MetricSample>> {
        let samples = match self
            .metrics
            .samples(device_id, metric_name, self.config.history_days)
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                warn!(device = %device_id, metric = %metric_name, "Failed to load metric history: {}", e);
                return None;
            }
        };
        if samples.len() < self.config.min_samples {
            debug!(
                device = %device_id,
                metric = %metric_name,
                have = samples.len(),
                needed = self.config.min_samples,
                "not enough history to forecast"
            );
            return None;
        }
        Some(samples)
    }

    /// Forecast `metric_name` at each horizon (minutes). Empty when history is short.
    /// An empty `horizons` slice uses the configured defaults.
    pub async fn predict_metric(
        &self,
        device_id: &str,
        metric_name: &str,
        horizons: &[u32],
    ) -> Vec<Prediction> {
        let Some(samples) = self.history(device_id, metric_name).await else {
            return Vec::new();
        };
        let horizons = if horizons.is_empty() {
            self.config.default_horizons.as_slice()
        } else {
            horizons
        };

        let model = select_model(&samples);
        let params = self.params();
        let mut predictions = Vec::with_capacity(horizons.len());
        for &horizon in horizons {
            match forecast_with(&samples, horizon, model, &params) {
                Ok(p) => predictions.push(p),
                Err(e) => debug!(device = %device_id, metric = %metric_name, horizon, "forecast skipped: {}", e),
            }
        }

        for p in &predictions {
            if let Err(e) = self.predictions.append(p).await {
                warn!(
                    device = %device_id,
                    metric = %metric_name,
                    horizon = p.horizon_minutes,
                    "Failed to persist prediction: {}",
                    e
                );
            }
        }

        info!(device = %device_id, metric = %metric_name, %model, count = predictions.len(), "forecast complete");
        predictions
    }

    /// Earliest crossing of any threshold within the configured look-ahead.
    /// `None` thresholds means warning=80 / critical=90 (upper).
    pub async fn predict_threshold_crossing(
        &self,
        device_id: &str,
        metric_name: &str,
        thresholds: Option<&[Threshold]>,
    ) -> Option<ThresholdCrossing> {
        let samples = self.history(device_id, metric_name).await?;
        let defaults;
        let thresholds = match thresholds {
            Some(t) => t,
            None => {
                defaults = Threshold::defaults();
                defaults.as_slice()
            }
        };
        earliest_crossing(&samples, thresholds, self.config.crossing_lookahead_hours)
    }

    /// Project exhaustion of the critical metric set for one device.
    /// Metrics are evaluated concurrently; warnings are sorted soonest first.
    pub async fn detect_resource_exhaustion(&self, device_id: &str) -> Vec<ExhaustionWarning> {
        let lookahead = self.config.exhaustion_lookahead_hours;
        let checks = CRITICAL_METRICS.iter().map(|&(metric, limit)| async move {
            let samples = self.history(device_id, metric).await?;
            let threshold = Threshold::upper("exhaustion", limit);
            let crossing = predict_crossing(&samples, &threshold, lookahead)?;
            Some(exhaustion_warning(crossing))
        });

        let mut warnings: Vec<ExhaustionWarning> =
            join_all(checks).await.into_iter().flatten().collect();
        warnings.sort_by(|a, b| a.hours_remaining.total_cmp(&b.hours_remaining));

        for w in &warnings {
            warn!(
                device = %w.device_id,
                metric = %w.metric_name,
                severity = %w.severity,
                hours_remaining = w.hours_remaining,
                "resource exhaustion projected"
            );
        }
        warnings
    }
}

fn earliest_crossing(
    samples: &[MetricSample],
    thresholds: &[Threshold],
    lookahead_hours: f64,
) -> Option<ThresholdCrossing> {
    thresholds
        .iter()
        .filter_map(|t| predict_crossing(samples, t, lookahead_hours))
        .min_by(|a, b| a.hours_until_crossing.total_cmp(&b.hours_until_crossing))
}

fn exhaustion_warning(crossing: ThresholdCrossing) -> ExhaustionWarning {
    let severity = exhaustion_severity(crossing.hours_until_crossing);
    let message = format!(
        "{} on {} projected to reach {:.1} in {:.1}h (now {:.1}, +{:.2}/h)",
        crossing.metric_name,
        crossing.device_id,
        crossing.threshold_value,
        crossing.hours_until_crossing,
        crossing.current_value,
        crossing.growth_rate_per_hour,
    );
    ExhaustionWarning {
        device_id: crossing.device_id,
        metric_name: crossing.metric_name,
        threshold_value: crossing.threshold_value,
        current_value: crossing.current_value,
        hours_remaining: crossing.hours_until_crossing,
        estimated_exhaustion_time: crossing.estimated_crossing_time,
        growth_rate_per_hour: crossing.growth_rate_per_hour,
        confidence: crossing.confidence,
        severity,
        message,
    }
}
