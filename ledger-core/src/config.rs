//! Configuration for the ledger

use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Storage backend
    pub storage: StorageBackend,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Loan limits
    pub loans: LoanConfig,

    /// Penalty defaults
    pub penalties: PenaltyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "chama-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageBackend::Memory,
            rocksdb: RocksDbConfig::default(),
            loans: LoanConfig::default(),
            penalties: PenaltyConfig::default(),
        }
    }
}

/// Which backend holds the tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-process map, lost on exit
    Memory,
    /// RocksDB under `data_dir` (needs the `rocksdb` feature)
    Rocksdb,
}

impl FromStr for StorageBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "rocksdb" => Ok(StorageBackend::Rocksdb),
            other => Err(crate::Error::Config(format!(
                "Unknown storage backend: {}",
                other
            ))),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Loan limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanConfig {
    /// Longest allowed schedule
    pub max_duration_months: u32,

    /// Largest principal a single loan may carry
    pub max_principal: Option<Money>,
}

impl Default for LoanConfig {
    fn default() -> Self {
        Self {
            max_duration_months: 60,
            max_principal: None,
        }
    }
}

/// Penalty defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Amount charged by the late-payment sweep; `None` disables it
    pub late_payment_amount: Option<Money>,
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
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `LEDGER_*` environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(storage) = std::env::var("LEDGER_STORAGE") {
            self.storage = storage.parse()?;
        }

        if let Ok(amount) = std::env::var("LEDGER_LATE_PAYMENT_PENALTY") {
            let amount: Money = amount.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_LATE_PAYMENT_PENALTY: {}", e))
            })?;
            self.penalties.late_payment_amount = Some(amount);
        }

        self.validate()
    }

    /// Reject settings no engine could honour
    pub fn validate(&self) -> crate::Result<()> {
        if self.loans.max_duration_months == 0 {
            return Err(crate::Error::Config(
                "loans.max_duration_months must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.loans.max_principal {
            if !max.is_positive() {
                return Err(crate::Error::Config(format!(
                    "loans.max_principal must be positive, got {}",
                    max
                )));
            }
        }
        if let Some(amount) = self.penalties.late_payment_amount {
            if !amount.is_positive() {
                return Err(crate::Error::Config(format!(
                    "penalties.late_payment_amount must be positive, got {}",
                    amount
                )));
            }
        }
        Ok(())
    }
}
