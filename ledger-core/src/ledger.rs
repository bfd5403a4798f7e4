//! Main ledger orchestration layer
//!
//! This module ties together storage, the clock and metrics, and hands out
//! the per-concern engines.
//!
//! # Example
//!
//! ```
//! use chama_ledger::{clock::SystemClock, types::{GroupId, UserId}, Ledger, MemberRole, Money};
//! use std::sync::Arc;
//!
//! # fn main() -> chama_ledger::Result<()> {
//! let ledger = Ledger::in_memory(Arc::new(SystemClock))?;
//! let member = ledger
//!     .members()
//!     .join(GroupId::generate(), UserId::generate(), MemberRole::Member)?;
//! ledger.savings().deposit(member.id, Money::from_major(200), None, None)?;
//! # Ok(())
//! # }
//! ```

use crate::{
    clock::{Clock, SystemClock},
    config::StorageBackend,
    engine::{LoanEngine, MemberRegistry, PenaltyEngine, SavingsEngine},
    metrics::Metrics,
    model::Transaction,
    storage::{Index, Reader, Storage},
    types::{MemberId, Reference},
    Config, Error, Result,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    /// Tables and the writer lock
    storage: Arc<Storage>,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Counters
    metrics: Arc<Metrics>,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration and the wall clock
    pub fn open(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open ledger with an explicit clock
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {}", e)))?,
        );

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            storage = ?config.storage,
            "Ledger opened"
        );

        Ok(Self {
            storage,
            clock,
            metrics,
            config,
        })
    }

    /// Volatile ledger with default settings
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let config = Config {
            storage: StorageBackend::Memory,
            ..Config::default()
        };
        Self::with_clock(config, clock)
    }

    /// Group membership and aggregates
    pub fn members(&self) -> MemberRegistry<'_> {
        MemberRegistry::new(self)
    }

    /// Loan lifecycle
    pub fn loans(&self) -> LoanEngine<'_> {
        LoanEngine::new(self)
    }

    /// Savings balances
    pub fn savings(&self) -> SavingsEngine<'_> {
        SavingsEngine::new(self)
    }

    /// Penalties
    pub fn penalties(&self) -> PenaltyEngine<'_> {
        PenaltyEngine::new(self)
    }

    /// Storage handle, for crates that keep their own tables in the ledger
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Clock
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Current instant from the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current date from the injected clock
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every transaction of a member, oldest first
    pub fn member_transactions(&self, member_id: MemberId) -> Result<Vec<Transaction>> {
        let mut txns: Vec<Transaction> = self
            .storage
            .children(Index::MemberTransactions, member_id.as_uuid())?;
        txns.sort_by_key(|t| (t.transaction_date, t.created_at));
        Ok(txns)
    }

    /// Transactions originating from one entity, oldest first
    pub fn reference_transactions(&self, reference: Reference) -> Result<Vec<Transaction>> {
        let mut txns: Vec<Transaction> = self
            .storage
            .children(Index::ReferenceTransactions, reference.as_uuid())?;
        txns.sort_by_key(|t| (t.transaction_date, t.created_at));
        Ok(txns)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("clock", &self.clock)
            .field("service", &self.config.service_name)
            .finish()
    }
}
