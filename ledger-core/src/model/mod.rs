//! Ledger entities
//!
//! Plain data plus the pure rules that only need the entity itself
//! (schedule arithmetic, charge allocation, balance checks). Anything that
//! touches more than one row lives in [`crate::engine`].

pub mod loan;
pub mod member;
pub mod penalty;
pub mod savings;
pub mod transaction;

pub use loan::{
    allocate_charges, charge_schedule, ChargeAllocation, Loan, LoanCharge, LoanChargeStatus,
    LoanPayment, LoanStatus,
};
pub use member::{GroupMember, MemberRole, MemberStatus, MemberTotals, TotalsDrift};
pub use penalty::{Penalty, PenaltyType};
pub use savings::SavingsAccount;
pub use transaction::{Transaction, TransactionType};

use crate::error::{Error, Result};

/// Longest accepted payment method label
pub const MAX_METHOD_LEN: usize = 50;

/// Payment methods are free-form labels ("cash", "bank_transfer", ...)
pub fn validate_method(method: &str) -> Result<()> {
    let trimmed = method.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("payment method is required".to_string()));
    }
    if trimmed.len() > MAX_METHOD_LEN {
        return Err(Error::InvalidInput(format!(
            "payment method longer than {} characters",
            MAX_METHOD_LEN
        )));
    }
    Ok(())
}
