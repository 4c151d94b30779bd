//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Conflict retry configuration
    pub retry: RetryConfig,

    /// Amount validation
    pub amounts: AmountConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "account-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            retry: RetryConfig::default(),
            amounts: AmountConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync the WAL before a write returns
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Retry configuration for version conflicts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Compare-and-set attempts per leg before `ConcurrencyExhausted`
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub initial_backoff_ms: u64,

    /// Backoff cap (milliseconds)
    pub max_backoff_ms: u64,

    /// Growth factor per retry
    pub backoff_multiplier: f64,

    /// Fraction of the delay randomized in either direction
    pub jitter_factor: f64,

    /// Attempts for reversing a transfer debit
    pub compensation_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 2,
            max_backoff_ms: 50,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
            compensation_attempts: 50,
        }
    }
}

/// Amount validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountConfig {
    /// Maximum decimal places (2 = cents)
    pub max_scale: u32,
}

impl Default for AmountConfig {
    fn default() -> Self {
        Self { max_scale: 2 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(attempts) = std::env::var("LEDGER_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_MAX_ATTEMPTS: {}", e)))?;
        }

        if let Ok(backoff) = std::env::var("LEDGER_INITIAL_BACKOFF_MS") {
            config.retry.initial_backoff_ms = backoff
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_INITIAL_BACKOFF_MS: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.compensation_attempts == 0 {
            return Err(crate::Error::Config(
                "retry.compensation_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(crate::Error::Config(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(crate::Error::Config(
                "retry.jitter_factor must be within [0, 1]".to_string(),
            ));
        }
        if self.amounts.max_scale > 28 {
            return Err(crate::Error::Config(
                "amounts.max_scale cannot exceed 28".to_string(),
            ));
        }
        Ok(())
    }
}
