//! Configuration for the settlement engine

use crate::interest::InterestMode;
use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// How the interest component of a settlement is computed
    pub interest: InterestMode,

    /// Ledger the settlements are recorded in
    pub ledger: chama_ledger::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "chama-settlement".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            interest: InterestMode::default(),
            ledger: chama_ledger::Config::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.ledger.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// Ledger settings come from the `LEDGER_*` variables; the interest
    /// strategy from `SETTLEMENT_INTEREST_STRATEGY`.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.ledger.apply_env()?;

        if let Ok(strategy) = std::env::var("SETTLEMENT_INTEREST_STRATEGY") {
            config.interest = strategy.parse()?;
        }

        Ok(config)
    }
}
