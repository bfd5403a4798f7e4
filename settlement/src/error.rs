//! Error types for the settlement engine

use chama_ledger::Money;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error (not found, duplicate, persistence, ...)
    #[error("Ledger error: {0}")]
    Ledger(#[from] chama_ledger::Error),

    /// Period or settlement is not in the state the operation requires
    #[error("Cannot {action} {entity} {id}: status is {actual}, expected {expected}")]
    InvalidState {
        /// Entity kind
        entity: &'static str,
        /// Entity id
        id: Uuid,
        /// Attempted operation
        action: &'static str,
        /// Required state
        expected: &'static str,
        /// Current state
        actual: String,
    },

    /// Non-positive amount
    #[error("Invalid {field}: {value} ({reason})")]
    InvalidAmount {
        /// Offending input
        field: &'static str,
        /// Value supplied
        value: String,
        /// Rule that was broken
        reason: &'static str,
    },

    /// End date not after start date
    #[error("Invalid settlement period: end {end} must be after start {start}")]
    InvalidPeriod {
        /// Start date
        start: NaiveDate,
        /// End date
        end: NaiveDate,
    },

    /// Payment larger than what is still pending
    #[error("Payment of {attempted} on settlement {settlement_id} exceeds pending amount {pending}")]
    ExceedsPending {
        /// Settlement id
        settlement_id: Uuid,
        /// Amount attempted
        attempted: Money,
        /// Amount pending
        pending: Money,
    },

    /// Finalization blocked by settlements with nothing paid
    #[error("Cannot finalize period {period_id}: {count} settlements are still pending payment")]
    UnresolvedSettlements {
        /// Period id
        period_id: Uuid,
        /// Settlements still pending
        count: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Helper for amount validation failures
    pub fn invalid_amount(field: &'static str, value: impl fmt::Display, reason: &'static str) -> Self {
        Error::InvalidAmount {
            field,
            value: value.to_string(),
            reason,
        }
    }

    /// True for rule violations, false for storage/config/io failures
    pub fn is_domain(&self) -> bool {
        match self {
            Error::Ledger(inner) => inner.is_domain(),
            Error::Config(_) | Error::Io(_) => false,
            _ => true,
        }
    }

    /// True when a uniqueness constraint was hit
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::Ledger(chama_ledger::Error::Duplicate { .. }))
    }
}
