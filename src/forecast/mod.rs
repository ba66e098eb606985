//! Metric forecasting: model selection, point forecasts with confidence
//! intervals, and threshold-crossing estimation.

pub mod engine;
pub mod model;
pub mod stats;
pub mod trend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alert::Severity;

pub use self::engine::ForecastEngine;
pub use self::model::{forecast, select_model};
pub use self::trend::predict_crossing;

/// z value for a two-sided 95% interval.
pub const Z_95: f64 = 1.96;

#[derive(Debug, Error, PartialEq)]
pub enum ForecastError {
    #[error("insufficient data: need {needed} samples, have {have}")]
    InsufficientData { needed: usize, have: usize },
    #[error("series has no spread in time; cannot fit a trend")]
    DegenerateSeries,
}

/// A stored metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_id: String,
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Linear,
    Exponential,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::Linear => write!(f, "linear"),
            ModelType::Exponential => write!(f, "exponential"),
        }
    }
}

impl std::str::FromStr for ModelType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ModelType::Linear),
            "exponential" => Ok(ModelType::Exponential),
            other => anyhow::bail!("unknown model type '{}'", other),
        }
    }
}

/// A point forecast with its 95% interval. `ci_lower <= predicted_value <= ci_upper`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub device_id: String,
    pub metric_name: String,
    pub horizon_minutes: u32,
    pub predicted_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub confidence_level: f64,
    pub model_type: ModelType,
    pub predicted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    /// Crossed when the metric rises to the threshold.
    Upper,
    /// Crossed when the metric falls to the threshold.
    Lower,
}

impl std::fmt::Display for ThresholdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdType::Upper => write!(f, "upper"),
            ThresholdType::Lower => write!(f, "lower"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// A named boundary to test a trend against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub label: String,
    pub value: f64,
    pub kind: ThresholdType,
}

impl Threshold {
    pub fn upper(label: impl Into<String>, value: f64) -> Self {
        Self { label: label.into(), value, kind: ThresholdType::Upper }
    }

    pub fn lower(label: impl Into<String>, value: f64) -> Self {
        Self { label: label.into(), value, kind: ThresholdType::Lower }
    }

    /// Used when a caller names no thresholds.
    pub fn defaults() -> Vec<Threshold> {
        vec![Threshold::upper("warning", 80.0), Threshold::upper("critical", 90.0)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCrossing {
    pub device_id: String,
    pub metric_name: String,
    pub threshold_label: String,
    pub threshold_value: f64,
    pub threshold_type: ThresholdType,
    pub estimated_crossing_time: DateTime<Utc>,
    pub hours_until_crossing: f64,
    /// |r| of the fitted trend.
    pub confidence: f64,
    pub current_value: f64,
    pub trend: Trend,
    pub growth_rate_per_hour: f64,
}

/// A projected exhaustion of a critical resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExhaustionWarning {
    pub device_id: String,
    pub metric_name: String,
    pub threshold_value: f64,
    pub current_value: f64,
    pub hours_remaining: f64,
    pub estimated_exhaustion_time: DateTime<Utc>,
    pub growth_rate_per_hour: f64,
    pub confidence: f64,
    pub severity: Severity,
    pub message: String,
}

/// Severity by time left before the resource runs out.
pub fn exhaustion_severity(hours_remaining: f64) -> Severity {
    if hours_remaining < 1.0 {
        Severity::Critical
    } else if hours_remaining < 4.0 {
        Severity::Error
    } else if hours_remaining < 12.0 {
        Severity::Warning
    } else {
        Severity::Info
    }
}
