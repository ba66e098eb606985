//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS metric_samples (
            id INTEGER PRIMARY KEY,
            device_id TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            value REAL NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            alert_type TEXT NOT NULL,
            message TEXT NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            suppressed INTEGER NOT NULL DEFAULT 0,
            suppression_reason TEXT,
            noise_score REAL
        );

        CREATE TABLE IF NOT EXISTS suppression_rules (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            rule_type TEXT NOT NULL,
            device_id TEXT,
            alert_pattern TEXT,
            start_time TEXT,
            end_time TEXT,
            days_of_week TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS predictions (
            id INTEGER PRIMARY KEY,
            device_id TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            horizon_minutes INTEGER NOT NULL,
            predicted_value REAL NOT NULL,
            ci_lower REAL NOT NULL,
            ci_upper REAL NOT NULL,
            confidence_level REAL NOT NULL,
            model_type TEXT NOT NULL,
            predicted_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_metric_samples_series
            ON metric_samples(device_id, metric_name, recorded_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_key ON alerts(device_id, alert_type, created_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
        CREATE INDEX IF NOT EXISTS idx_predictions_series ON predictions(device_id, metric_name);",
    )?;

    Ok(())
}
