use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alert::AlertCandidate;
use crate::forecast::ExhaustionWarning;
use crate::noise::FlappingAlert;
use crate::AlertPipeline;

/// Alert type of candidates raised from exhaustion projections.
pub const EXHAUSTION_ALERT_TYPE: &str = "resource_exhaustion";

#[derive(Debug, Clone, Serialize)]
pub struct SuppressedCandidate {
    pub candidate: AlertCandidate,
    pub reason: String,
}

/// Outcome of one scan pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scanned_at: DateTime<Utc>,
    pub devices: usize,
    pub warnings: Vec<ExhaustionWarning>,
    pub admitted: Vec<AlertCandidate>,
    pub suppressed: Vec<SuppressedCandidate>,
    pub flapping: Vec<FlappingAlert>,
}

/// The message is kept stable across scans so repeated projections of the
/// same exhaustion fall into the duplicate window.
fn exhaustion_candidate(warning: &ExhaustionWarning, at: DateTime<Utc>) -> AlertCandidate {
    AlertCandidate::new(
        warning.device_id.clone(),
        EXHAUSTION_ALERT_TYPE,
        format!("{} projected to reach {:.1}", warning.metric_name, warning.threshold_value),
        warning.severity,
    )
    .at(at)
}

/// Project exhaustion for every device, route each warning through the
/// noise engine, then review flapping over the last `review_hours`.
pub async fn run_scan_once(pipeline: &AlertPipeline, devices: &[String], review_hours: u32) -> ScanReport {
    let scanned_at = Utc::now();
    let per_device = join_all(
        devices
            .iter()
            .map(|d| pipeline.forecast.detect_resource_exhaustion(d)),
    )
    .await;
    let warnings: Vec<ExhaustionWarning> = per_device.into_iter().flatten().collect();

    let mut admitted = Vec::new();
    let mut suppressed = Vec::new();
    for warning in &warnings {
        let candidate = exhaustion_candidate(warning, scanned_at);
        let decision = pipeline.noise.evaluate(&candidate).await;
        match decision.reason {
            Some(reason) => {
                debug!(device = %candidate.device_id, %reason, "exhaustion alert suppressed");
                suppressed.push(SuppressedCandidate {
                    candidate,
                    reason: reason.to_string(),
                });
            }
            None => {
                warn!(
                    device = %candidate.device_id,
                    severity = %candidate.severity,
                    "{}",
                    warning.message
                );
                admitted.push(candidate);
            }
        }
    }

    let flapping = pipeline.noise.detect_flapping_alerts(review_hours).await;
    for f in &flapping {
        info!(
            device = %f.device_id,
            alert_type = %f.alert_type,
            transitions = f.transitions,
            flaps_per_hour = f.flaps_per_hour,
            "flapping alert"
        );
    }

    ScanReport {
        scanned_at,
        devices: devices.len(),
        warnings,
        admitted,
        suppressed,
        flapping,
    }
}

/// Run a scan at every tick of `schedule`. Returns when the schedule has no
/// further run times.
pub async fn run_scan_loop(
    pipeline: Arc<AlertPipeline>,
    schedule: Schedule,
    devices: Vec<String>,
    review_hours: u32,
) {
    info!(devices = devices.len(), "Scan scheduler started");

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Schedule has no upcoming run times, stopping");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        debug!(next = %next.to_rfc3339(), "waiting for next scan");
        tokio::time::sleep(wait).await;

        let report = run_scan_once(&pipeline, &devices, review_hours).await;
        info!(
            warnings = report.warnings.len(),
            admitted = report.admitted.len(),
            suppressed = report.suppressed.len(),
            flapping = report.flapping.len(),
            "scan complete"
        );
    }
}
