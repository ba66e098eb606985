//! TOML configuration for AlertPilot.
//!
//! A layered model: compiled-in defaults, overridden by a TOML file found via
//! the `ALERTPILOT_CONFIG` environment variable or the standard system path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the alert intelligence pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded alertpilot configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `ALERTPILOT_CONFIG` environment variable.
    /// 2. `/etc/alertpilot/alertpilot.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("ALERTPILOT_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ALERTPILOT_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/alertpilot/alertpilot.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject settings that would make the engines misbehave silently.
    pub fn validate(&self) -> Result<()> {
        self.forecast.validate()?;
        self.noise.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding samples, alerts, rules and predictions.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/alertpilot.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecasting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Minimum number of samples before any forecast is attempted.
    pub min_samples: usize,
    /// Days of history requested from the metric store.
    pub history_days: u32,
    /// Smoothing factor for the exponential model.
    pub smoothing_alpha: f64,
    /// Look-ahead cutoff for `predict_threshold_crossing`.
    pub crossing_lookahead_hours: f64,
    /// Look-ahead cutoff for resource exhaustion scans.
    pub exhaustion_lookahead_hours: f64,
    /// Horizons (minutes) used when a caller does not name any.
    pub default_horizons: Vec<u32>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            history_days: 7,
            smoothing_alpha: 0.3,
            crossing_lookahead_hours: 6.0,
            exhaustion_lookahead_hours: 24.0,
            default_horizons: vec![60, 240, 1440],
        }
    }
}

impl ForecastConfig {
    fn validate(&self) -> Result<()> {
        if self.min_samples < 3 {
            anyhow::bail!("forecast.min_samples must be at least 3, got {}", self.min_samples);
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            anyhow::bail!(
                "forecast.smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            );
        }
        for (key, hours) in [
            ("crossing_lookahead_hours", self.crossing_lookahead_hours),
            ("exhaustion_lookahead_hours", self.exhaustion_lookahead_hours),
        ] {
            if !(hours > 0.0 && hours <= MAX_WINDOW_SECS as f64 / 3600.0) {
                anyhow::bail!("forecast.{} must be in (0, {}], got {}", key, MAX_WINDOW_SECS / 3600, hours);
            }
        }
        if self.history_days == 0 {
            anyhow::bail!("forecast.history_days must be positive");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Noise reduction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// How long a rule-cache snapshot is trusted before reloading.
    pub cache_ttl_secs: u64,
    /// Identical alerts inside this window are duplicates.
    pub duplicate_window_secs: u64,
    /// Sliding window for the per (device, alert type) rate limit.
    pub rate_limit_window_secs: u64,
    /// Alerts admitted per window before rate limiting kicks in.
    pub rate_limit_threshold: usize,
    /// History window inspected for flapping.
    pub flapping_window_secs: u64,
    /// Minimum rows and status transitions that count as flapping.
    pub flapping_threshold: usize,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            duplicate_window_secs: 300,
            rate_limit_window_secs: 3600,
            rate_limit_threshold: 10,
            flapping_window_secs: 1800,
            flapping_threshold: 5,
        }
    }
}

impl NoiseConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        secs(self.duplicate_window_secs)
    }

    pub fn rate_limit_window(&self) -> chrono::Duration {
        secs(self.rate_limit_window_secs)
    }

    pub fn flapping_window(&self) -> chrono::Duration {
        secs(self.flapping_window_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limit_threshold == 0 {
            anyhow::bail!("noise.rate_limit_threshold must be positive");
        }
        if self.flapping_threshold == 0 {
            anyhow::bail!("noise.flapping_threshold must be positive");
        }
        for (key, value) in [
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("duplicate_window_secs", self.duplicate_window_secs),
            ("rate_limit_window_secs", self.rate_limit_window_secs),
            ("flapping_window_secs", self.flapping_window_secs),
        ] {
            if value > MAX_WINDOW_SECS {
                anyhow::bail!("noise.{} must be at most {}, got {}", key, MAX_WINDOW_SECS, value);
            }
        }
        if self.duplicate_window_secs == 0
            || self.rate_limit_window_secs == 0
            || self.flapping_window_secs == 0
        {
            anyhow::bail!("noise windows must be positive");
        }
        Ok(())
    }
}

/// Longest accepted window or look-ahead: one leap year.
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 3600;

/// Saturates instead of panicking for values chrono cannot represent.
fn secs(s: u64) -> chrono::Duration {
    i64::try_from(s)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.forecast.min_samples, 20);
        assert_eq!(cfg.noise.rate_limit_threshold, 10);
        assert_eq!(cfg.noise.cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [noise]
            rate_limit_threshold = 3

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.noise.rate_limit_threshold, 3);
        assert_eq!(cfg.noise.duplicate_window_secs, 300);
        assert_eq!(cfg.forecast.default_horizons, vec![60, 240, 1440]);
        assert_eq!(cfg.logging.format, "json");
    }

    #[test]
    fn test_validate_rejects_bad_alpha() {
        let mut cfg = AppConfig::default();
        cfg.forecast.smoothing_alpha = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_windows() {
        let mut cfg = AppConfig::default();
        cfg.noise.duplicate_window_secs = 10_000_000_000_000_000;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("noise.duplicate_window_secs"), "{}", err);

        let mut cfg = AppConfig::default();
        cfg.noise.flapping_window_secs = MAX_WINDOW_SECS;
        cfg.validate().unwrap();
        cfg.noise.flapping_window_secs = MAX_WINDOW_SECS + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.forecast.exhaustion_lookahead_hours = 1e12;
        assert!(cfg.validate().is_err());
        cfg.forecast.exhaustion_lookahead_hours = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_window_helpers_saturate() {
        let mut cfg = NoiseConfig::default();
        cfg.duplicate_window_secs = 10_000_000_000_000_000;
        cfg.rate_limit_window_secs = u64::MAX;
        assert_eq!(cfg.duplicate_window(), chrono::Duration::MAX);
        assert_eq!(cfg.rate_limit_window(), chrono::Duration::MAX);
        assert_eq!(cfg.flapping_window(), chrono::Duration::seconds(1800));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertpilot.toml");
        std::fs::write(&path, "[storage]\ndb_path = \"/tmp/x.db\"\n").unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.storage.db_path, PathBuf::from("/tmp/x.db"));
    }
}
