//! Storage layer -- collaborator interfaces, SQLite backing, in-memory backing.
//!
//! The engines only see the traits below. Every method is an I/O boundary:
//! callers decide how to react to failure (the engines fail open or fail
//! empty, they never retry).

pub mod memory;
pub mod schema;
pub mod sqlite;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use uuid::Uuid;

use crate::forecast::{MetricSample, Prediction};
use crate::noise::{AlertHistoryEntry, AlertRecord, RuleFilter, SuppressionRule};

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Canonical timestamp encoding; lexical order equals time order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Start of a window of length `span` ending at `end`. Never earlier than
/// the Unix epoch, which predates every stored row.
pub(crate) fn window_start(end: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    end.checked_sub_signed(span)
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |t| t.max(DateTime::<Utc>::UNIX_EPOCH))
}

/// Suppressed-vs-total counts for a reporting window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuppressionSummary {
    pub total: u64,
    pub by_reason: BTreeMap<String, u64>,
}

/// Historical metric samples, written by an ingestion path outside this crate.
#[async_trait]
pub trait HistoricalMetricStore: Send + Sync {
    /// Samples for the last `days` days, ordered by timestamp ascending.
    /// May return fewer samples than the window could hold.
    async fn samples(&self, device_id: &str, metric_name: &str, days: u32) -> Result<Vec<MetricSample>>;
}

/// Past alert occurrences, used for flapping detection.
#[async_trait]
pub trait AlertHistoryStore: Send + Sync {
    /// Rows for one (device, alert type) created in `[since, until]`, newest first.
    async fn recent(
        &self,
        device_id: &str,
        alert_type: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AlertHistoryEntry>>;

    /// Rows for every device created at or after `since`, newest first.
    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<AlertRecord>>;
}

/// Operator-managed suppression rules.
#[async_trait]
pub trait SuppressionRuleStore: Send + Sync {
    async fn create(&self, rule: &SuppressionRule) -> Result<()>;
    /// Replace a stored rule; `false` when the id is unknown.
    async fn update(&self, rule: &SuppressionRule) -> Result<bool>;
    /// `false` when the id is unknown.
    async fn delete(&self, id: Uuid) -> Result<bool>;
    async fn get(&self, id: Uuid) -> Result<Option<SuppressionRule>>;
    async fn list(&self, filter: &RuleFilter) -> Result<Vec<SuppressionRule>>;
    async fn list_active(&self) -> Result<Vec<SuppressionRule>>;
}

/// Sink for produced predictions.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn append(&self, prediction: &Prediction) -> Result<()>;
}

/// Sink for suppression outcomes on stored alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn mark_suppressed(&self, alert_id: &str, reason: &str, noise_score: f64) -> Result<()>;
    async fn suppression_summary(&self, since: DateTime<Utc>) -> Result<SuppressionSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_encoding_round_trips() {
        let ts = Utc::now();
        let parsed = parse_ts(&fmt_ts(&ts)).unwrap();
        assert_eq!(parsed.timestamp_micros(), ts.timestamp_micros());
    }

    #[test]
    fn test_window_start_clamps_to_epoch() {
        let now = Utc::now();
        assert_eq!(window_start(now, Duration::hours(2)), now - Duration::hours(2));
        assert_eq!(
            window_start(now, Duration::hours(i64::from(u32::MAX))),
            DateTime::<Utc>::UNIX_EPOCH
        );
        assert_eq!(window_start(now, Duration::MAX), DateTime::<Utc>::UNIX_EPOCH);
        // Still encodes as a sortable timestamp.
        assert_eq!(fmt_ts(&DateTime::<Utc>::UNIX_EPOCH), "1970-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_open_pool_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alertpilot.db");
        let pool = open_pool(&path).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM suppression_rules", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
