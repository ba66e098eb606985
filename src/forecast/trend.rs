//! Threshold-crossing estimation from a linear trend over elapsed hours.

use chrono::Duration;
use tracing::debug;

use crate::forecast::model::elapsed_secs;
use crate::forecast::stats::LinearFit;
use crate::forecast::{MetricSample, Threshold, ThresholdCrossing, ThresholdType, Trend};

/// Slopes flatter than this (units per hour) are treated as no trend.
pub const STABLE_SLOPE_PER_HOUR: f64 = 0.1;
/// Minimum |r| before a trend is trusted.
pub const MIN_TREND_CORRELATION: f64 = 0.5;

pub fn classify_trend(slope_per_hour: f64) -> Trend {
    if slope_per_hour.abs() < STABLE_SLOPE_PER_HOUR {
        Trend::Stable
    } else if slope_per_hour > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

/// Estimate when the series' trend reaches `threshold`.
///
/// Returns `None` unless the trend heads toward the threshold, the fit has
/// |r| >= 0.5, and the crossing lies strictly after the last sample and no
/// more than `lookahead_hours` past it.
pub fn predict_crossing(
    samples: &[MetricSample],
    threshold: &Threshold,
    lookahead_hours: f64,
) -> Option<ThresholdCrossing> {
    let last = samples.last()?;
    let hours: Vec<f64> = elapsed_secs(samples).into_iter().map(|s| s / 3600.0).collect();
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let fit = LinearFit::fit(&hours, &values).ok()?;

    let trend = classify_trend(fit.slope);
    let heading_there = matches!(
        (threshold.kind, trend),
        (ThresholdType::Upper, Trend::Increasing) | (ThresholdType::Lower, Trend::Decreasing)
    );
    if !heading_there || fit.r.abs() < MIN_TREND_CORRELATION {
        debug!(
            metric = %last.metric_name,
            threshold = %threshold.label,
            ?trend,
            r = fit.r,
            "trend does not support a crossing"
        );
        return None;
    }

    let crossing_at = (threshold.value - fit.intercept) / fit.slope;
    let hours_away = crossing_at - hours.last().copied().unwrap_or(0.0);
    if !hours_away.is_finite() || hours_away <= 0.0 || hours_away > lookahead_hours {
        debug!(
            metric = %last.metric_name,
            threshold = %threshold.label,
            hours_away,
            lookahead_hours,
            "crossing outside look-ahead window"
        );
        return None;
    }

    let offset = Duration::milliseconds((hours_away * 3_600_000.0).round() as i64);
    Some(ThresholdCrossing {
        device_id: last.device_id.clone(),
        metric_name: last.metric_name.clone(),
        threshold_label: threshold.label.clone(),
        threshold_value: threshold.value,
        threshold_type: threshold.kind,
        estimated_crossing_time: last.timestamp + offset,
        hours_until_crossing: hours_away,
        confidence: fit.r.abs(),
        current_value: last.value,
        trend,
        growth_rate_per_hour: fit.slope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn hourly(values: impl IntoIterator<Item = f64>) -> Vec<MetricSample> {
        let base = Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap();
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| MetricSample {
                device_id: "D1".to_string(),
                metric_name: "disk_usage".to_string(),
                timestamp: base + Duration::hours(i as i64),
                value,
            })
            .collect()
    }

    #[test]
    fn test_rising_series_crosses_upper_threshold() {
        // 72 hourly samples rising 50 -> 88, so 90 is about 3.7h ahead. The ramp
        // stops short of 90 because a series already past it has no crossing.
        let samples = hourly((0..72).map(|i| 50.0 + 38.0 * i as f64 / 71.0));
        let crossing =
            predict_crossing(&samples, &Threshold::upper("critical", 90.0), 6.0).unwrap();

        assert_eq!(crossing.threshold_type, ThresholdType::Upper);
        assert_eq!(crossing.trend, Trend::Increasing);
        assert!(crossing.confidence >= 0.5);
        assert!(crossing.hours_until_crossing > 0.0 && crossing.hours_until_crossing <= 6.0);
        let last = samples.last().unwrap().timestamp;
        assert!(crossing.estimated_crossing_time > last);
        assert!(crossing.estimated_crossing_time <= last + Duration::hours(6));
        assert!((crossing.current_value - 88.0).abs() < 1e-9);
    }

    #[test]
    fn test_already_crossed_is_rejected() {
        // Rising 50 -> 95 passes 90 inside the history, so nothing lies ahead.
        let samples = hourly((0..72).map(|i| 50.0 + 45.0 * i as f64 / 71.0));
        assert!(predict_crossing(&samples, &Threshold::upper("critical", 90.0), 6.0).is_none());
    }

    #[test]
    fn test_crossing_beyond_lookahead_is_rejected() {
        let samples = hourly((0..48).map(|i| 10.0 + 0.5 * i as f64));
        assert!(predict_crossing(&samples, &Threshold::upper("critical", 90.0), 6.0).is_none());
        assert!(predict_crossing(&samples, &Threshold::upper("critical", 90.0), 200.0).is_some());
    }

    #[test]
    fn test_direction_must_match_threshold() {
        let falling = hourly((0..48).map(|i| 60.0 - 0.5 * i as f64));
        assert!(predict_crossing(&falling, &Threshold::upper("critical", 90.0), 24.0).is_none());

        let crossing = predict_crossing(&falling, &Threshold::lower("floor", 35.0), 24.0).unwrap();
        assert_eq!(crossing.trend, Trend::Decreasing);
        assert_eq!(crossing.threshold_type, ThresholdType::Lower);
    }

    #[test]
    fn test_stable_and_noisy_series_yield_nothing() {
        let flat = hourly((0..48).map(|i| 70.0 + 0.01 * i as f64));
        assert!(predict_crossing(&flat, &Threshold::upper("warning", 71.0), 1000.0).is_none());

        // Large zig-zag around a weak upward drift: |r| stays below 0.5.
        let noisy = hourly((0..48).map(|i| {
            let zig = if i % 2 == 0 { -20.0 } else { 20.0 };
            50.0 + 0.15 * i as f64 + zig
        }));
        assert!(predict_crossing(&noisy, &Threshold::upper("warning", 80.0), 1000.0).is_none());
    }

    #[test]
    fn test_classify_trend() {
        assert_eq!(classify_trend(0.05), Trend::Stable);
        assert_eq!(classify_trend(-0.09), Trend::Stable);
        assert_eq!(classify_trend(0.2), Trend::Increasing);
        assert_eq!(classify_trend(-0.2), Trend::Decreasing);
    }
}
