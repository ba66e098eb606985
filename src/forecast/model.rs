//! Model selection and point forecasts.
//!
//! Two models are supported. `Linear` is an OLS trend over elapsed seconds,
//! extrapolated to the horizon. `Exponential` is simple exponential
//! smoothing; its forecast is flat (the last smoothed level) at every
//! horizon, which is what SES predicts for a series with no modelled trend.

use chrono::Utc;
use tracing::debug;

use crate::forecast::stats::{LinearFit, TimeSeries};
use crate::forecast::{ForecastError, MetricSample, ModelType, Prediction, Z_95};

/// Tunables shared by the forecasting functions.
#[derive(Debug, Clone, Copy)]
pub struct ModelParams {
    pub min_samples: usize,
    pub alpha: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            min_samples: 20,
            alpha: 0.3,
        }
    }
}

/// Seconds since the first sample, one entry per sample.
pub(crate) fn elapsed_secs(samples: &[MetricSample]) -> Vec<f64> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    samples
        .iter()
        .map(|s| (s.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0)
        .collect()
}

fn values(samples: &[MetricSample]) -> Vec<f64> {
    samples.iter().map(|s| s.value).collect()
}

/// Pick the model that best suits the series shape.
///
/// A strong linear fit (R² > 0.7) wins; otherwise a volatile series
/// (CV > 0.3) goes to exponential smoothing; anything else stays linear.
pub fn select_model(samples: &[MetricSample]) -> ModelType {
    let series = TimeSeries::new(values(samples));
    let cv = series.coefficient_of_variation();
    let lag1 = if series.len() >= 10 { series.autocorrelation(1) } else { None };
    let r_squared = LinearFit::fit(&elapsed_secs(samples), series.values())
        .map(|fit| fit.r_squared)
        .unwrap_or(0.0);

    let model = if r_squared.abs() > 0.7 {
        ModelType::Linear
    } else if cv > 0.3 {
        ModelType::Exponential
    } else {
        ModelType::Linear
    };
    debug!(samples = series.len(), cv, ?lag1, r_squared, %model, "model selected");
    model
}

/// Forecast `horizon_minutes` past the last sample with default parameters.
pub fn forecast(
    samples: &[MetricSample],
    horizon_minutes: u32,
    model: ModelType,
) -> Result<Prediction, ForecastError> {
    forecast_with(samples, horizon_minutes, model, &ModelParams::default())
}

pub fn forecast_with(
    samples: &[MetricSample],
    horizon_minutes: u32,
    model: ModelType,
    params: &ModelParams,
) -> Result<Prediction, ForecastError> {
    let needed = params.min_samples.max(2);
    if samples.len() < needed {
        return Err(ForecastError::InsufficientData {
            needed,
            have: samples.len(),
        });
    }

    let (predicted_value, margin) = match model {
        ModelType::Linear => linear_point(samples, horizon_minutes)?,
        ModelType::Exponential => smoothed_point(&values(samples), params.alpha),
    };

    let first = &samples[0];
    Ok(Prediction {
        device_id: first.device_id.clone(),
        metric_name: first.metric_name.clone(),
        horizon_minutes,
        predicted_value,
        ci_lower: predicted_value - margin,
        ci_upper: predicted_value + margin,
        confidence_level: 0.95,
        model_type: model,
        predicted_at: Utc::now(),
    })
}

fn linear_point(samples: &[MetricSample], horizon_minutes: u32) -> Result<(f64, f64), ForecastError> {
    let xs = elapsed_secs(samples);
    let fit = LinearFit::fit(&xs, &values(samples))?;
    let last_x = xs.last().copied().unwrap_or(0.0);
    let target = last_x + f64::from(horizon_minutes) * 60.0;
    let n = fit.n as f64;
    let margin = Z_95 * (fit.mse * (1.0 + 1.0 / n)).sqrt();
    Ok((fit.predict(target), margin))
}

fn smoothed_point(values: &[f64], alpha: f64) -> (f64, f64) {
    let mut level = values[0];
    let mut residuals = Vec::with_capacity(values.len().saturating_sub(1));
    for &v in &values[1..] {
        residuals.push(v - level);
        level = alpha * v + (1.0 - alpha) * level;
    }
    let margin = Z_95 * TimeSeries::new(residuals).std_dev();
    (level, margin)
}
