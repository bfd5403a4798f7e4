//! Mutating operations over the ledger tables
//!
//! Each engine borrows the [`Ledger`](crate::Ledger) and runs every
//! mutation as one unit of work: load, validate, stage, commit. Validation
//! happens before anything is staged, and a failed commit discards the
//! whole unit.
//!
//! Engines never call a locking API while they hold a unit of work; the
//! writer lock is not reentrant.

mod loans;
mod members;
mod penalties;
mod savings;

pub use loans::{LoanEngine, LoanPaymentRequest, LoanSummary, OverdueSweep, PaymentReceipt};
pub use members::{MemberRegistry, Reconciliation};
pub use penalties::{
    GroupPenaltyReport, MemberPenaltyTotals, PenaltyEngine, PenaltyHistory, TypeTotals,
};
pub use savings::{SavingsEngine, SavingsReceipt, SavingsSummary};

use crate::{
    error::{Error, Result},
    model::{GroupMember, Transaction},
    money::Money,
    storage::{Index, Reader, Record, UnitOfWork},
    types::MemberId,
};

/// Stage a transaction together with its member and reference index entries
pub fn post_transaction(uow: &mut UnitOfWork<'_>, txn: &Transaction) -> Result<()> {
    uow.put(txn)?;
    uow.link(
        Index::MemberTransactions,
        txn.member_id.as_uuid(),
        txn.id.as_uuid(),
    );
    uow.link(
        Index::ReferenceTransactions,
        txn.reference.as_uuid(),
        txn.id.as_uuid(),
    );
    tracing::debug!(
        transaction_id = %txn.id,
        kind = %txn.kind,
        amount = %txn.amount,
        reference = %txn.reference,
        "Transaction staged"
    );
    Ok(())
}

/// Load a member that is still in the group
pub(crate) fn load_current_member<R: Reader>(
    reader: &R,
    member_id: MemberId,
    action: &'static str,
) -> Result<GroupMember> {
    let member: GroupMember = reader.fetch(member_id.as_uuid())?;
    if member.has_left() {
        return Err(Error::InvalidState {
            entity: GroupMember::ENTITY,
            id: member_id.as_uuid(),
            action,
            expected: "member of the group",
            actual: "left".to_string(),
        });
    }
    Ok(member)
}

/// Load a member that is active and still in the group
pub(crate) fn load_active_member<R: Reader>(
    reader: &R,
    member_id: MemberId,
    action: &'static str,
) -> Result<GroupMember> {
    let member = load_current_member(reader, member_id, action)?;
    if !member.is_active() {
        return Err(Error::InvalidState {
            entity: GroupMember::ENTITY,
            id: member_id.as_uuid(),
            action,
            expected: "active",
            actual: member.status.to_string(),
        });
    }
    Ok(member)
}

/// `InvalidAmount` unless strictly positive and within [`Money::MAX`]
pub(crate) fn require_positive(field: &'static str, amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(Error::invalid_amount(field, amount, "must be positive"));
    }
    require_within_max(field, amount)
}

/// `InvalidAmount` when the amount is above [`Money::MAX`]
pub(crate) fn require_within_max(field: &'static str, amount: Money) -> Result<()> {
    if amount.exceeds_max() {
        return Err(Error::invalid_amount(field, amount, "above the maximum amount"));
    }
    Ok(())
}
