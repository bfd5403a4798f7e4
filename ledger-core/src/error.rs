//! Error types for the ledger

use crate::money::Money;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which part of a loan payment overshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentComponent {
    /// Principal portion
    Principal,
    /// Monthly charge portion
    Charges,
}

impl fmt::Display for PaymentComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentComponent::Principal => write!(f, "principal"),
            PaymentComponent::Charges => write!(f, "charges"),
        }
    }
}

/// Ledger errors
///
/// Every domain variant is raised before any write is staged, so a failed
/// operation leaves storage untouched.
#[derive(Error, Debug)]
pub enum Error {
    /// Entity is not in the lifecycle state the operation requires
    #[error("Cannot {action} {entity} {id}: status is {actual}, expected {expected}")]
    InvalidState {
        /// Entity kind ("loan", "penalty", ...)
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

    /// Non-positive or out-of-range amount or count
    #[error("Invalid {field}: {value} ({reason})")]
    InvalidAmount {
        /// Offending input
        field: &'static str,
        /// Value supplied
        value: String,
        /// Rule that was broken
        reason: &'static str,
    },

    /// Withdrawal larger than the available balance
    #[error("Insufficient balance in savings account {account_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Savings account id
        account_id: Uuid,
        /// Amount requested
        requested: Money,
        /// Current balance
        available: Money,
    },

    /// Loan payment larger than what is still owed
    #[error("Overpayment on loan {loan_id}: {component} of {attempted} exceeds outstanding {outstanding}")]
    Overpayment {
        /// Loan id
        loan_id: Uuid,
        /// Principal or charges
        component: PaymentComponent,
        /// Amount attempted
        attempted: Money,
        /// Amount still owed for that component
        outstanding: Money,
    },

    /// Penalty is already waived
    #[error("Penalty {0} is already waived")]
    AlreadyWaived(Uuid),

    /// Penalty is not waived, so there is nothing to reverse
    #[error("Penalty {0} is not waived")]
    NotWaived(Uuid),

    /// Uniqueness constraint hit
    #[error("Duplicate {entity}: {key}")]
    Duplicate {
        /// Constrained entity
        entity: &'static str,
        /// Human-readable key
        key: String,
    },

    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Requested id
        id: Uuid,
    },

    /// Amount or running total would pass the ledger ceiling
    #[error("Amount overflow: {0}")]
    Overflow(String),

    /// Structurally invalid request (mismatched owner, bad dates)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage or serialization failure; the unit of work was discarded
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
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
        !matches!(
            self,
            Error::Persistence(_) | Error::Config(_) | Error::Io(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Persistence(format!("serialization: {}", err))
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}
