//! Chama Ledger Core
//!
//! Money ledger for community savings groups: memberships, loans with a
//! monthly charge schedule, savings balances, penalties, and the
//! transaction log they all write to.
//!
//! # Architecture
//!
//! - **Units of work**: every mutation reads, validates, stages and commits
//!   atomically; a failure before commit leaves nothing behind
//! - **Single writer**: one writer lock serializes mutations, reads never
//!   block
//! - **Injected clock**: due dates and overdue checks come from a [`Clock`]
//! - **Materialized views**: member aggregates are cached and can be
//!   reconciled against the ledger rows at any time
//!
//! # Invariants
//!
//! - Savings: `current_balance == deposits + interest - withdrawals >= 0`
//! - Loans: `remaining_balance == principal - principal_paid >= 0`
//! - Charges: `amount_paid <= charge_amount`
//! - Member totals equal the sums of their underlying rows

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod money;
pub mod storage;
pub mod types;

// Re-exports
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use engine::{
    LoanEngine, LoanPaymentRequest, LoanSummary, MemberRegistry, OverdueSweep, PaymentReceipt,
    PenaltyEngine, Reconciliation, SavingsEngine, SavingsReceipt, SavingsSummary,
};
pub use error::{Error, PaymentComponent, Result};
pub use ledger::Ledger;
pub use model::{
    GroupMember, Loan, LoanCharge, LoanChargeStatus, LoanPayment, LoanStatus, MemberRole,
    MemberStatus, MemberTotals, Penalty, PenaltyType, SavingsAccount, Transaction,
    TransactionType,
};
pub use money::Money;
pub use types::{
    ActorId, ChargeId, GroupId, LoanId, LoanPaymentId, MemberId, PenaltyId, PeriodId, Reference,
    SavingsId, SettlementId, SettlementPaymentId, TransactionId, UserId,
};
