//! AlertPilot -- alert intelligence for infrastructure monitoring.
//!
//! This crate provides forecasting over historical device metrics
//! (predictions, threshold crossings, resource exhaustion) and noise
//! reduction for candidate alerts (suppression rules, deduplication,
//! rate limiting, flapping detection).

pub mod alert;
pub mod config;
pub mod forecast;
pub mod noise;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::forecast::ForecastEngine;
use crate::noise::NoiseReductionEngine;
use crate::storage::{
    AlertHistoryStore, AlertStore, HistoricalMetricStore, PredictionStore, SqliteStore,
    SuppressionRuleStore,
};

/// One forecasting engine and one noise engine, built once at start-up and
/// shared by every caller in the process.
pub struct AlertPipeline {
    pub forecast: ForecastEngine,
    pub noise: NoiseReductionEngine,
}

impl AlertPipeline {
    /// Build both engines over a single store implementing every
    /// collaborator interface.
    pub fn with_store<S>(store: Arc<S>, config: &AppConfig) -> Self
    where
        S: HistoricalMetricStore
            + AlertHistoryStore
            + SuppressionRuleStore
            + PredictionStore
            + AlertStore
            + 'static,
    {
        let metrics: Arc<dyn HistoricalMetricStore> = store.clone();
        let predictions: Arc<dyn PredictionStore> = store.clone();
        let rules: Arc<dyn SuppressionRuleStore> = store.clone();
        let history: Arc<dyn AlertHistoryStore> = store.clone();
        let alerts: Arc<dyn AlertStore> = store;

        Self {
            forecast: ForecastEngine::new(metrics, predictions, config.forecast.clone()),
            noise: NoiseReductionEngine::new(rules, history, alerts, config.noise.clone()),
        }
    }

    /// Open the configured SQLite database and build the pipeline over it.
    pub fn open(config: &AppConfig) -> Result<(Self, Arc<SqliteStore>)> {
        let db_path = &config.storage.db_path;
        tracing::info!(db_path = %db_path.display(), "Initializing database");
        let pool = storage::open_pool(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        let store = Arc::new(SqliteStore::new(pool));
        Ok((Self::with_store(store.clone(), config), store))
    }
}
