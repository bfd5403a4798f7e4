//! Append-only transaction log

use crate::{
    money::Money,
    storage::{Record, Table},
    types::{ActorId, GroupId, MemberId, Reference, TransactionId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Savings deposit
    Deposit,
    /// Savings withdrawal
    Withdrawal,
    /// Loan principal paid out
    LoanDisburse,
    /// Loan repayment (principal and charges)
    LoanPayment,
    /// Interest credited to savings
    Interest,
    /// Loan charge
    Charge,
    /// Group fee
    Fee,
    /// Settlement payment
    SettlementPayment,
}

impl TransactionType {
    /// Kinds that move a savings balance
    pub fn affects_savings(&self) -> bool {
        matches!(
            self,
            TransactionType::Deposit | TransactionType::Withdrawal | TransactionType::Interest
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::LoanDisburse => "loan_disburse",
            TransactionType::LoanPayment => "loan_payment",
            TransactionType::Interest => "interest",
            TransactionType::Charge => "charge",
            TransactionType::Fee => "fee",
            TransactionType::SettlementPayment => "settlement_payment",
        };
        f.write_str(name)
    }
}

/// One balance-affecting event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id
    pub id: TransactionId,

    /// Group
    pub group_id: GroupId,

    /// Member
    pub member_id: MemberId,

    /// Kind
    pub kind: TransactionType,

    /// Amount moved (always positive)
    pub amount: Money,

    /// Balance of the referenced entity after this event
    pub balance_after: Money,

    /// Description
    pub description: String,

    /// Originating entity
    pub reference: Reference,

    /// Who triggered it
    pub created_by: Option<ActorId>,

    /// Business date
    pub transaction_date: NaiveDate,

    /// Insert time
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a transaction dated `now`
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        group_id: GroupId,
        member_id: MemberId,
        kind: TransactionType,
        amount: Money,
        balance_after: Money,
        description: impl Into<String>,
        reference: Reference,
        created_by: Option<ActorId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            group_id,
            member_id,
            kind,
            amount,
            balance_after,
            description: description.into(),
            reference,
            created_by,
            transaction_date: now.date_naive(),
            created_at: now,
        }
    }

    /// Dated within `[start, end]`
    pub fn within(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.transaction_date >= start && self.transaction_date <= end
    }
}

impl Record for Transaction {
    const TABLE: Table = Table::Transactions;
    const ENTITY: &'static str = "transaction";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SavingsId;

    #[test]
    fn test_within_is_inclusive() {
        let now = NaiveDate::from_ymd_opt(2025, 3, 31)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            .and_utc();
        let txn = Transaction::record(
            GroupId::generate(),
            MemberId::generate(),
            TransactionType::Deposit,
            Money::from_major(10),
            Money::from_major(10),
            "Savings deposit",
            Reference::Savings(SavingsId::generate()),
            None,
            now,
        );
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        assert!(txn.within(start, end));
        assert!(!txn.within(start, NaiveDate::from_ymd_opt(2025, 3, 30).unwrap()));
        assert!(txn.kind.affects_savings());
        assert_eq!(TransactionType::SettlementPayment.to_string(), "settlement_payment");
    }
}
