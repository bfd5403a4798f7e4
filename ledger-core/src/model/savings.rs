//! Savings account balance rules

use crate::{
    error::{Error, Result},
    money::Money,
    storage::{Record, Table},
    types::{GroupId, MemberId, SavingsId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One savings balance per (group, member)
///
/// `current_balance == total_deposits + interest_earned - total_withdrawals`
/// and never drops below zero; the `apply_*` methods are the only
/// mutators and each keeps both facts true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsAccount {
    /// Account id
    pub id: SavingsId,

    /// Group
    pub group_id: GroupId,

    /// Owner
    pub member_id: MemberId,

    /// Balance
    pub current_balance: Money,

    /// Lifetime deposits
    pub total_deposits: Money,

    /// Lifetime withdrawals
    pub total_withdrawals: Money,

    /// Lifetime interest credited
    pub interest_earned: Money,

    /// Most recent deposit
    pub last_deposit_date: Option<NaiveDate>,

    /// Most recent withdrawal
    pub last_withdrawal_date: Option<NaiveDate>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl SavingsAccount {
    /// Empty account
    pub fn open(group_id: GroupId, member_id: MemberId, now: DateTime<Utc>) -> Self {
        Self {
            id: SavingsId::generate(),
            group_id,
            member_id,
            current_balance: Money::ZERO,
            total_deposits: Money::ZERO,
            total_withdrawals: Money::ZERO,
            interest_earned: Money::ZERO,
            last_deposit_date: None,
            last_withdrawal_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credit a deposit
    pub fn apply_deposit(&mut self, amount: Money, now: DateTime<Utc>) -> Result<Money> {
        if !amount.is_positive() {
            return Err(Error::invalid_amount("deposit", amount, "must be positive"));
        }
        let balance = self.current_balance.checked_add(amount)?;
        let deposits = self.total_deposits.checked_add(amount)?;
        self.current_balance = balance;
        self.total_deposits = deposits;
        self.last_deposit_date = Some(now.date_naive());
        self.updated_at = now;
        Ok(self.current_balance)
    }

    /// Debit a withdrawal
    pub fn apply_withdrawal(&mut self, amount: Money, now: DateTime<Utc>) -> Result<Money> {
        if !amount.is_positive() {
            return Err(Error::invalid_amount("withdrawal", amount, "must be positive"));
        }
        if amount > self.current_balance {
            return Err(Error::InsufficientBalance {
                account_id: self.id.as_uuid(),
                requested: amount,
                available: self.current_balance,
            });
        }
        let withdrawals = self.total_withdrawals.checked_add(amount)?;
        self.current_balance = self.current_balance.checked_sub(amount)?;
        self.total_withdrawals = withdrawals;
        self.last_withdrawal_date = Some(now.date_naive());
        self.updated_at = now;
        Ok(self.current_balance)
    }

    /// Credit interest; zero is accepted
    pub fn apply_interest(&mut self, amount: Money, now: DateTime<Utc>) -> Result<Money> {
        if amount.is_negative() {
            return Err(Error::invalid_amount("interest", amount, "must not be negative"));
        }
        let balance = self.current_balance.checked_add(amount)?;
        let interest = self.interest_earned.checked_add(amount)?;
        self.current_balance = balance;
        self.interest_earned = interest;
        self.updated_at = now;
        Ok(self.current_balance)
    }

    /// Balance identity holds
    pub fn is_consistent(&self) -> bool {
        self.current_balance == self.total_deposits + self.interest_earned - self.total_withdrawals
            && !self.current_balance.is_negative()
    }
}

impl Record for SavingsAccount {
    const TABLE: Table = Table::Savings;
    const ENTITY: &'static str = "savings account";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}
