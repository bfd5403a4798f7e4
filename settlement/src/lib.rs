//! Settlement Engine
//!
//! Periodic settlement of a savings group's books: each settlement period
//! produces one settlement per active member, stating what the member owes
//! for the period, and tracks payments until the period is finalized.
//!
//! # Lifecycle
//!
//! 1. **Create**: open an active period with a unique name per group
//! 2. **Generate**: build settlements from deposits, interest and penalties
//!    dated within the period (idempotent)
//! 3. **Collect**: record payments; each one posts a ledger transaction
//! 4. **Close**: stop generation, keep accepting payments
//! 5. **Finalize**: lock the period once no settlement is left unpaid
//!
//! # Breakdown
//!
//! `total_due = max(0, savings + interest + (penalties_applied - penalties_waived))`
//!
//! The interest component is an [`InterestStrategy`] chosen in [`Config`].
//!
//! # Example
//!
//! ```no_run
//! use chama_settlement::{Config, SettlementEngine};
//! use chama_ledger::GroupId;
//! use chrono::NaiveDate;
//!
//! fn main() -> chama_settlement::Result<()> {
//!     let engine = SettlementEngine::new(Config::from_env()?)?;
//!
//!     let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
//!     let end = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
//!     let period = engine.create_period(GroupId::generate(), "2025 H1", start, end, None, None)?;
//!
//!     let report = engine.generate_settlements(period.id)?;
//!     println!("{} settlements, {} due",
//!              report.settlements.len(), report.period.totals.total_settlement_amount);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod interest;
pub mod types;
pub mod validation;

// Re-exports
pub use config::Config;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use interest::{
    InterestMode, InterestStrategy, MemberActivity, NoInterest, OwnLoanCharges, SavingsInterest,
};
pub use types::*;
