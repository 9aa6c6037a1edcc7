//! Configuration management for the DocuLink engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml)
//! - Default values

use crate::errors::{CoreError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Deduplication thresholds
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Linker strategy cascade tuning
    #[serde(default)]
    pub linker: LinkerConfig,

    /// Alert rule thresholds
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Storage retry policy
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupConfig {
    /// Relative amount tolerance for the fuzzy (client, amount) rule
    #[serde(default = "default_dedup_amount_tolerance")]
    pub amount_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkerConfig {
    /// Date proximity window for the party+date strategy, in days
    #[serde(default = "default_date_window_days")]
    pub date_window_days: i64,

    /// Relative tolerance against remaining capacity for the amount strategy
    #[serde(default = "default_linker_amount_tolerance")]
    pub amount_tolerance: f64,

    /// Minimum confidence for the party+date strategy
    #[serde(default = "default_party_date_floor")]
    pub party_date_floor: f64,

    /// Minimum confidence for the amount proximity strategy
    #[serde(default = "default_amount_proximity_floor")]
    pub amount_proximity_floor: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    /// Utilization ratio that raises a warning
    #[serde(default = "default_utilization_warning")]
    pub utilization_warning: f64,

    /// Utilization ratio that raises a critical alert
    #[serde(default = "default_utilization_critical")]
    pub utilization_critical: f64,

    /// Days before an agreement's due date at which the expiry warning fires
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Maximum retry attempts for transient storage failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff interval in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_dedup_amount_tolerance() -> f64 {
    0.01
}

fn default_date_window_days() -> i64 {
    45
}

fn default_linker_amount_tolerance() -> f64 {
    0.05
}

fn default_party_date_floor() -> f64 {
    0.6
}

fn default_amount_proximity_floor() -> f64 {
    0.5
}

fn default_utilization_warning() -> f64 {
    0.80
}

fn default_utilization_critical() -> f64 {
    0.95
}

fn default_expiry_warning_days() -> i64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: default_dedup_amount_tolerance(),
        }
    }
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            date_window_days: default_date_window_days(),
            amount_tolerance: default_linker_amount_tolerance(),
            party_date_floor: default_party_date_floor(),
            amount_proximity_floor: default_amount_proximity_floor(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            utilization_warning: default_utilization_warning(),
            utilization_critical: default_utilization_critical(),
            expiry_warning_days: default_expiry_warning_days(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment.
    ///
    /// Precedence (lowest to highest): defaults, `config.toml`,
    /// environment variables prefixed with `APP__` using `__` separators
    /// (e.g. `APP__ALERTS__UTILIZATION_WARNING=0.75`).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()
            .map_err(|e| CoreError::Configuration {
                message: e.to_string(),
            })?;

        config
            .try_deserialize()
            .map_err(|e| CoreError::Configuration {
                message: e.to_string(),
            })
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.alerts.utilization_warning >= self.alerts.utilization_critical {
            return Err(CoreError::Configuration {
                message: "utilization_warning must be below utilization_critical".into(),
            });
        }
        if self.linker.date_window_days <= 0 {
            return Err(CoreError::Configuration {
                message: "date_window_days must be positive".into(),
            });
        }
        Ok(())
    }
}
