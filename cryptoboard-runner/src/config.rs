//! Serializable pipeline configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields the production pipeline: top 20 by market cap in USD,
//! published to `API_CRYPTO_DASHBOARD.crypto_boys`.

use crate::warehouse::TableRef;
use cryptoboard_core::data::SourceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full pipeline configuration. Each stage receives only its own section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run-level lock file. No lock is taken when unset.
    pub lock_path: Option<PathBuf>,
    pub source: SourceConfig,
    pub warehouse: WarehouseConfig,
    pub checkpoint: CheckpointConfig,
    pub retry: RetryConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.per_page == 0 {
            return Err(ConfigError::Invalid("source.per_page must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        self.warehouse.table_ref()?;
        Ok(())
    }
}

/// Destination table and publisher transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub project_id: String,
    /// `dataset.table`
    pub table: String,
    /// Service-account key file, used when no access token is supplied.
    pub credentials_path: PathBuf,
    /// Job location (e.g. `US`, `EU`). Omitted from job requests when unset.
    pub location: Option<String>,
    pub timeout_secs: u64,
    pub job_poll_interval_ms: u64,
    pub job_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: "api-crypto-dashboard".into(),
            table: "API_CRYPTO_DASHBOARD.crypto_boys".into(),
            credentials_path: PathBuf::from("config/api-crypto-dashboard.json"),
            location: None,
            timeout_secs: 60,
            job_poll_interval_ms: 1000,
            job_timeout_secs: 300,
        }
    }
}

impl WarehouseConfig {
    /// The fully-qualified destination table.
    pub fn table_ref(&self) -> Result<TableRef, ConfigError> {
        TableRef::parse(&self.project_id, &self.table)
            .map_err(|e| ConfigError::Invalid(format!("warehouse.table: {e}")))
    }
}

/// Optional file checkpoints written alongside a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub raw_path: Option<PathBuf>,
    /// `.parquet` selects Parquet, anything else CSV.
    pub enriched_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per stage, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}
