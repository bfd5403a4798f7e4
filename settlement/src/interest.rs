//! Interest strategies
//!
//! "Interest earned" in a settlement is group policy, so it is pluggable.
//! A strategy looks only at a [`MemberActivity`] snapshot loaded inside the
//! generating unit of work, which keeps every strategy a pure function.

use crate::{
    types::{SettlementBreakdown, SettlementPeriod},
    Error,
};
use chama_ledger::{
    storage::{Index, Reader},
    GroupMember, Loan, LoanCharge, LoanChargeStatus, Money, Penalty, Transaction, TransactionType,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Everything the breakdown of one member's settlement depends on
#[derive(Debug, Clone)]
pub struct MemberActivity {
    /// Member
    pub member: GroupMember,
    /// All of the member's transactions
    pub transactions: Vec<Transaction>,
    /// The member's loans with their charge schedules
    pub loans: Vec<(Loan, Vec<LoanCharge>)>,
    /// All of the member's penalties
    pub penalties: Vec<Penalty>,
}

impl MemberActivity {
    /// Load a member's rows through `reader`
    pub fn load<R: Reader>(reader: &R, member: GroupMember) -> chama_ledger::Result<Self> {
        let member_id = member.id.as_uuid();
        let transactions = reader.children(Index::MemberTransactions, member_id)?;
        let loans: Vec<Loan> = reader.children(Index::MemberLoans, member_id)?;
        let loans = loans
            .into_iter()
            .map(|loan| {
                let charges = reader.children(Index::LoanCharges, loan.id.as_uuid())?;
                Ok((loan, charges))
            })
            .collect::<chama_ledger::Result<Vec<_>>>()?;
        let penalties = reader.children(Index::MemberPenalties, member_id)?;
        Ok(Self {
            member,
            transactions,
            loans,
            penalties,
        })
    }

    /// Σ transactions of `kind` dated within the period
    pub fn sum_within(&self, kind: TransactionType, period: &SettlementPeriod) -> Money {
        self.transactions
            .iter()
            .filter(|t| t.kind == kind && t.within(period.start_date, period.end_date))
            .map(|t| t.amount)
            .sum()
    }

    /// Penalties applied within the period, split into (unwaived, waived)
    pub fn penalties_within(&self, period: &SettlementPeriod) -> (Money, Money) {
        self.penalties
            .iter()
            .filter(|p| period.contains(p.applied_at.date_naive()))
            .fold((Money::ZERO, Money::ZERO), |(applied, waived), p| {
                if p.waived {
                    (applied, waived + p.amount)
                } else {
                    (applied + p.amount, waived)
                }
            })
    }

    /// Breakdown with interest from `strategy`
    pub fn breakdown(
        &self,
        period: &SettlementPeriod,
        strategy: &dyn InterestStrategy,
    ) -> SettlementBreakdown {
        let (penalties_applied, penalties_waived) = self.penalties_within(period);
        SettlementBreakdown {
            savings: self.sum_within(TransactionType::Deposit, period),
            interest: strategy.interest_earned(self, period),
            penalties_applied,
            penalties_waived,
        }
    }
}

/// Computes the interest component of a settlement
pub trait InterestStrategy: Send + Sync + fmt::Debug {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Interest attributed to the member for the period, never negative
    fn interest_earned(&self, activity: &MemberActivity, period: &SettlementPeriod) -> Money;
}

/// Charges paid within the period on the member's own loans issued within
/// the period
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnLoanCharges;

impl InterestStrategy for OwnLoanCharges {
    fn name(&self) -> &'static str {
        "own_loan_charges"
    }

    fn interest_earned(&self, activity: &MemberActivity, period: &SettlementPeriod) -> Money {
        activity
            .loans
            .iter()
            .filter(|(loan, _)| loan.issued_at.map_or(false, |d| period.contains(d)))
            .flat_map(|(_, charges)| charges.iter())
            .filter(|c| {
                c.status == LoanChargeStatus::Paid
                    && c.paid_at.map_or(false, |d| period.contains(d))
            })
            .map(|c| c.amount_paid)
            .sum()
    }
}

/// Interest credited to the member's savings within the period
#[derive(Debug, Clone, Copy, Default)]
pub struct SavingsInterest;

impl InterestStrategy for SavingsInterest {
    fn name(&self) -> &'static str {
        "savings_interest"
    }

    fn interest_earned(&self, activity: &MemberActivity, period: &SettlementPeriod) -> Money {
        activity.sum_within(TransactionType::Interest, period)
    }
}

/// No interest component
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterest;

impl InterestStrategy for NoInterest {
    fn name(&self) -> &'static str {
        "none"
    }

    fn interest_earned(&self, _activity: &MemberActivity, _period: &SettlementPeriod) -> Money {
        Money::ZERO
    }
}

/// Configurable choice of [`InterestStrategy`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestMode {
    /// [`OwnLoanCharges`]
    #[default]
    OwnLoanCharges,
    /// [`SavingsInterest`]
    SavingsInterest,
    /// [`NoInterest`]
    None,
}

impl InterestMode {
    /// Strategy implementing this mode
    pub fn strategy(&self) -> Box<dyn InterestStrategy> {
        match self {
            InterestMode::OwnLoanCharges => Box::new(OwnLoanCharges),
            InterestMode::SavingsInterest => Box::new(SavingsInterest),
            InterestMode::None => Box::new(NoInterest),
        }
    }
}

impl FromStr for InterestMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "own_loan_charges" => Ok(InterestMode::OwnLoanCharges),
            "savings_interest" => Ok(InterestMode::SavingsInterest),
            "none" => Ok(InterestMode::None),
            other => Err(Error::Config(format!("Unknown interest strategy: {}", other))),
        }
    }
}
