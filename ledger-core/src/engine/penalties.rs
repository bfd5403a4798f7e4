//! Penalty engine
//!
//! Penalties do not touch savings or loan balances and emit no transaction;
//! they only count against a member when settlements are generated.

use crate::{
    error::{Error, Result},
    model::{Loan, LoanCharge, Penalty, PenaltyType},
    money::Money,
    storage::{Index, Reader, UnitOfWork},
    types::{ActorId, GroupId, LoanId, MemberId, PenaltyId},
    Ledger,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Penalty totals of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyHistory {
    /// Member
    pub member_id: MemberId,
    /// Σ amount of every penalty
    pub total_applied: Money,
    /// Σ amount of waived penalties
    pub total_waived: Money,
    /// Σ amount of active penalties
    pub total_active: Money,
    /// Penalty count per type
    pub count_by_type: BTreeMap<PenaltyType, usize>,
    /// Penalties, newest first
    pub penalties: Vec<Penalty>,
}

/// Count and amount for one penalty type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTotals {
    /// Number of penalties
    pub count: usize,
    /// Σ amount
    pub amount: Money,
}

/// Penalty totals for one member inside a group report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPenaltyTotals {
    /// Member
    pub member_id: MemberId,
    /// Σ amount
    pub total: Money,
    /// Σ amount not waived
    pub active: Money,
    /// Number of penalties
    pub count: usize,
}

/// Group-wide penalty report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPenaltyReport {
    /// Group
    pub group_id: GroupId,
    /// Σ amount of every penalty
    pub total_applied: Money,
    /// Σ amount waived
    pub total_waived: Money,
    /// Σ amount active
    pub total_active: Money,
    /// Totals per type
    pub by_type: BTreeMap<PenaltyType, TypeTotals>,
    /// Members with at least one penalty
    pub members: Vec<MemberPenaltyTotals>,
}

/// Penalty operations
#[derive(Debug, Clone, Copy)]
pub struct PenaltyEngine<'a> {
    ledger: &'a Ledger,
}

impl<'a> PenaltyEngine<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Charge a penalty to a member, optionally against one of their loans
    pub fn apply_penalty(
        &self,
        member_id: MemberId,
        penalty_type: PenaltyType,
        amount: Money,
        reason: impl Into<String>,
        loan_id: Option<LoanId>,
    ) -> Result<Penalty> {
        super::require_positive("penalty", amount)?;
        let mut uow = self.ledger.storage().begin();
        let penalty = self.stage_penalty(
            &mut uow,
            member_id,
            penalty_type,
            amount,
            reason.into(),
            loan_id,
        )?;
        uow.commit()?;
        self.applied(&penalty);
        Ok(penalty)
    }

    fn stage_penalty(
        &self,
        uow: &mut UnitOfWork<'_>,
        member_id: MemberId,
        penalty_type: PenaltyType,
        amount: Money,
        reason: String,
        loan_id: Option<LoanId>,
    ) -> Result<Penalty> {
        let member = super::load_current_member(&*uow, member_id, "penalize")?;
        if let Some(loan_id) = loan_id {
            let loan: Loan = uow.fetch(loan_id.as_uuid())?;
            if loan.member_id != member_id {
                return Err(Error::InvalidInput(format!(
                    "loan {} does not belong to member {}",
                    loan_id, member_id
                )));
            }
        }

        let penalty = Penalty {
            id: PenaltyId::generate(),
            group_id: member.group_id,
            member_id,
            loan_id,
            penalty_type,
            amount,
            reason,
            applied_at: self.ledger.now(),
            waived: false,
            waived_reason: None,
            waived_at: None,
            waived_by: None,
        };
        uow.put(&penalty)?;
        uow.link(Index::MemberPenalties, member_id.as_uuid(), penalty.id.as_uuid());
        uow.link(Index::GroupPenalties, member.group_id.as_uuid(), penalty.id.as_uuid());
        if let Some(loan_id) = loan_id {
            uow.link(Index::LoanPenalties, loan_id.as_uuid(), penalty.id.as_uuid());
        }
        Ok(penalty)
    }

    fn applied(&self, penalty: &Penalty) {
        self.ledger.metrics().record_penalty("applied");
        tracing::info!(
            penalty_id = %penalty.id,
            member_id = %penalty.member_id,
            loan_id = ?penalty.loan_id.map(|id| id.to_string()),
            penalty_type = %penalty.penalty_type,
            amount = %penalty.amount,
            "Penalty applied"
        );
    }

    /// Late-payment penalty on a loan's borrower
    pub fn apply_late_payment_penalty(
        &self,
        loan_id: LoanId,
        amount: Money,
        reason: Option<String>,
    ) -> Result<Penalty> {
        let reason = reason.unwrap_or_else(|| format!("Late payment on loan {}", loan_id));
        self.apply_loan_penalty(loan_id, PenaltyType::LatePayment, amount, reason)
    }

    /// Rule-violation penalty
    pub fn apply_violation_penalty(
        &self,
        member_id: MemberId,
        amount: Money,
        description: &str,
    ) -> Result<Penalty> {
        self.apply_penalty(
            member_id,
            PenaltyType::Violation,
            amount,
            format!("Rule violation: {}", description),
            None,
        )
    }

    /// Default penalty on a loan's borrower
    pub fn apply_default_penalty(
        &self,
        loan_id: LoanId,
        amount: Money,
        reason: Option<String>,
    ) -> Result<Penalty> {
        let reason = reason
            .unwrap_or_else(|| format!("Loan default - principal not repaid on loan {}", loan_id));
        self.apply_loan_penalty(loan_id, PenaltyType::Default, amount, reason)
    }

    /// Penalize a loan's borrower; the loan is read inside the same unit
    fn apply_loan_penalty(
        &self,
        loan_id: LoanId,
        penalty_type: PenaltyType,
        amount: Money,
        reason: String,
    ) -> Result<Penalty> {
        super::require_positive("penalty", amount)?;
        let mut uow = self.ledger.storage().begin();
        let loan: Loan = uow.fetch(loan_id.as_uuid())?;
        let penalty = self.stage_penalty(
            &mut uow,
            loan.member_id,
            penalty_type,
            amount,
            reason,
            Some(loan_id),
        )?;
        uow.commit()?;
        self.applied(&penalty);
        Ok(penalty)
    }

    /// Waive an active penalty
    pub fn waive_penalty(
        &self,
        penalty_id: PenaltyId,
        reason: impl Into<String>,
        actor: ActorId,
    ) -> Result<Penalty> {
        let mut uow = self.ledger.storage().begin();
        let mut penalty: Penalty = uow.fetch(penalty_id.as_uuid())?;
        if let Err(err) = penalty.waive(reason.into(), actor, self.ledger.now()) {
            tracing::warn!(penalty_id = %penalty_id, "Penalty already waived");
            return Err(err);
        }
        uow.put(&penalty)?;
        uow.commit()?;

        self.ledger.metrics().record_penalty("waived");
        tracing::info!(
            penalty_id = %penalty_id,
            member_id = %penalty.member_id,
            amount = %penalty.amount,
            waived_by = ?penalty.waived_by.as_ref().map(ActorId::as_str),
            "Penalty waived"
        );
        Ok(penalty)
    }

    /// Restore a waived penalty to active
    pub fn reverse_waiver(&self, penalty_id: PenaltyId) -> Result<Penalty> {
        let mut uow = self.ledger.storage().begin();
        let mut penalty: Penalty = uow.fetch(penalty_id.as_uuid())?;
        penalty.reverse_waiver()?;
        uow.put(&penalty)?;
        uow.commit()?;

        self.ledger.metrics().record_penalty("reversed");
        tracing::info!(penalty_id = %penalty_id, "Penalty waiver reversed");
        Ok(penalty)
    }

    /// Apply a late-payment penalty when the loan has an overdue charge and
    /// no active late-payment penalty yet. Check and insert share one unit
    /// of work, so concurrent callers create at most one penalty.
    pub fn check_and_apply_late_payment_penalties(
        &self,
        loan_id: LoanId,
        amount: Money,
    ) -> Result<Option<Penalty>> {
        super::require_positive("penalty", amount)?;
        let today = self.ledger.today();
        let mut uow = self.ledger.storage().begin();
        let penalty = self.late_penalty_in_unit(&mut uow, loan_id, amount, today)?;
        if let Some(penalty) = &penalty {
            uow.commit()?;
            self.applied(penalty);
        }
        Ok(penalty)
    }

    fn late_penalty_in_unit(
        &self,
        uow: &mut UnitOfWork<'_>,
        loan_id: LoanId,
        amount: Money,
        today: NaiveDate,
    ) -> Result<Option<Penalty>> {
        let loan: Loan = uow.fetch(loan_id.as_uuid())?;
        let charges: Vec<LoanCharge> = uow.children(Index::LoanCharges, loan_id.as_uuid())?;
        if !charges.iter().any(|c| c.is_overdue(today)) {
            return Ok(None);
        }

        let existing: Vec<Penalty> = uow.children(Index::LoanPenalties, loan_id.as_uuid())?;
        if existing
            .iter()
            .any(|p| p.penalty_type == PenaltyType::LatePayment && p.is_active())
        {
            tracing::debug!(loan_id = %loan_id, "Active late-payment penalty already exists");
            return Ok(None);
        }

        let reason = format!("Late payment on loan {}", loan_id);
        self.stage_penalty(
            uow,
            loan.member_id,
            PenaltyType::LatePayment,
            amount,
            reason,
            Some(loan_id),
        )
        .map(Some)
    }

    /// Run the late-payment check across every active loan in one unit
    pub fn sweep_late_payments(&self, amount: Money) -> Result<Vec<Penalty>> {
        super::require_positive("penalty", amount)?;
        let today = self.ledger.today();
        let mut uow = self.ledger.storage().begin();
        let loans: Vec<Loan> = uow.scan()?;

        let mut applied = Vec::new();
        for loan in loans.iter().filter(|l| l.is_active()) {
            if let Some(penalty) = self.late_penalty_in_unit(&mut uow, loan.id, amount, today)? {
                applied.push(penalty);
            }
        }
        uow.commit()?;

        for penalty in &applied {
            self.applied(penalty);
        }
        tracing::info!(applied = applied.len(), "Late-payment sweep finished");
        Ok(applied)
    }

    /// Load a penalty
    pub fn get(&self, penalty_id: PenaltyId) -> Result<Penalty> {
        self.ledger.storage().fetch(penalty_id.as_uuid())
    }

    /// Every penalty of a member, newest first
    pub fn member_penalties(&self, member_id: MemberId) -> Result<Vec<Penalty>> {
        let mut penalties: Vec<Penalty> = self
            .ledger
            .storage()
            .children(Index::MemberPenalties, member_id.as_uuid())?;
        penalties.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        Ok(penalties)
    }

    /// Penalties attached to a loan
    pub fn loan_penalties(&self, loan_id: LoanId) -> Result<Vec<Penalty>> {
        self.ledger
            .storage()
            .children(Index::LoanPenalties, loan_id.as_uuid())
    }

    /// Unwaived penalties of a member, newest first
    pub fn active_penalties(&self, member_id: MemberId) -> Result<Vec<Penalty>> {
        Ok(self
            .member_penalties(member_id)?
            .into_iter()
            .filter(Penalty::is_active)
            .collect())
    }

    /// Σ unwaived penalty amounts of a member
    pub fn total_active_penalties(&self, member_id: MemberId) -> Result<Money> {
        Ok(self
            .active_penalties(member_id)?
            .iter()
            .map(|p| p.amount)
            .sum())
    }

    /// Totals and full list for one member
    pub fn penalty_history(&self, member_id: MemberId) -> Result<PenaltyHistory> {
        let penalties = self.member_penalties(member_id)?;
        let mut history = PenaltyHistory {
            member_id,
            total_applied: Money::ZERO,
            total_waived: Money::ZERO,
            total_active: Money::ZERO,
            count_by_type: BTreeMap::new(),
            penalties: Vec::new(),
        };
        for penalty in &penalties {
            history.total_applied += penalty.amount;
            if penalty.waived {
                history.total_waived += penalty.amount;
            } else {
                history.total_active += penalty.amount;
            }
            *history.count_by_type.entry(penalty.penalty_type).or_insert(0) += 1;
        }
        history.penalties = penalties;
        Ok(history)
    }

    /// Group-wide totals by type and by member
    pub fn group_report(&self, group_id: GroupId) -> Result<GroupPenaltyReport> {
        let penalties: Vec<Penalty> = self
            .ledger
            .storage()
            .children(Index::GroupPenalties, group_id.as_uuid())?;

        let mut report = GroupPenaltyReport {
            group_id,
            total_applied: Money::ZERO,
            total_waived: Money::ZERO,
            total_active: Money::ZERO,
            by_type: BTreeMap::new(),
            members: Vec::new(),
        };
        let mut per_member: BTreeMap<MemberId, MemberPenaltyTotals> = BTreeMap::new();

        for penalty in &penalties {
            report.total_applied += penalty.amount;
            if penalty.waived {
                report.total_waived += penalty.amount;
            } else {
                report.total_active += penalty.amount;
            }

            let by_type = report.by_type.entry(penalty.penalty_type).or_default();
            by_type.count += 1;
            by_type.amount += penalty.amount;

            let member = per_member
                .entry(penalty.member_id)
                .or_insert_with(|| MemberPenaltyTotals {
                    member_id: penalty.member_id,
                    total: Money::ZERO,
                    active: Money::ZERO,
                    count: 0,
                });
            member.total += penalty.amount;
            member.active += penalty.effective_amount();
            member.count += 1;
        }
        report.members = per_member.into_values().collect();
        Ok(report)
    }
}
