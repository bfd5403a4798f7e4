//! Main settlement engine
//!
//! Drives periods through `active → closed → finalized`, generates one
//! settlement per active member, and records payments against them. Each
//! mutation is one ledger unit of work.

use crate::{
    config::Config,
    interest::{InterestStrategy, MemberActivity},
    types::*,
    validation, Error, Result,
};
use chama_ledger::{
    engine::post_transaction,
    model::validate_method,
    storage::{Index, Reader, UniqueKey},
    GroupId, GroupMember, Ledger, MemberId, Money, PeriodId, Reference, SettlementId,
    SettlementPaymentId, Transaction, TransactionType,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Settlement engine
#[derive(Debug)]
pub struct SettlementEngine {
    /// Ledger core
    ledger: Arc<Ledger>,

    /// Interest component of settlements
    interest: Box<dyn InterestStrategy>,

    /// Configuration
    config: Config,
}

impl SettlementEngine {
    /// Open the configured ledger and build an engine over it
    pub fn new(config: Config) -> Result<Self> {
        let ledger = Arc::new(Ledger::open(config.ledger.clone())?);
        Ok(Self::with_ledger(ledger, config))
    }

    /// Engine over an already open ledger
    pub fn with_ledger(ledger: Arc<Ledger>, config: Config) -> Self {
        let interest = config.interest.strategy();
        tracing::info!(
            service = %config.service_name,
            interest = interest.name(),
            "Settlement engine ready"
        );
        Self {
            ledger,
            interest,
            config,
        }
    }

    /// Replace the interest strategy
    pub fn with_strategy(mut self, strategy: Box<dyn InterestStrategy>) -> Self {
        self.interest = strategy;
        self
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a new active period for a group
    pub fn create_period(
        &self,
        group_id: GroupId,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        savings_target: Option<Money>,
        notes: Option<String>,
    ) -> Result<SettlementPeriod> {
        let name = validation::validate_period(name, start_date, end_date, savings_target)?;

        let mut uow = self.ledger.storage().begin();
        let period = SettlementPeriod {
            id: PeriodId::generate(),
            group_id,
            name,
            start_date,
            end_date,
            status: PeriodStatus::Active,
            savings_target,
            totals: PeriodTotals::default(),
            notes,
            created_at: self.ledger.now(),
            closed_at: None,
            finalized_at: None,
        };
        uow.claim_unique(
            &UniqueKey::PeriodName {
                group: group_id.as_uuid(),
                name: period.name.clone(),
            },
            period.id.as_uuid(),
        )?;
        uow.put(&period)?;
        uow.link(Index::GroupPeriods, group_id.as_uuid(), period.id.as_uuid());
        uow.commit()?;

        tracing::info!(
            period_id = %period.id,
            group_id = %group_id,
            name = %period.name,
            start = %start_date,
            end = %end_date,
            "Settlement period created"
        );
        Ok(period)
    }

    /// Create-or-return one settlement per active member and refresh the
    /// period totals
    ///
    /// Idempotent: a member that already has a settlement for the period
    /// keeps it unchanged.
    pub fn generate_settlements(&self, period_id: PeriodId) -> Result<GenerationReport> {
        let now = self.ledger.now();
        let mut uow = self.ledger.storage().begin();
        let mut period: SettlementPeriod = uow.fetch(period_id.as_uuid())?;
        validation::ensure_period_status(&period, PeriodStatus::Active, "generate settlements for")?;

        let members: Vec<GroupMember> =
            uow.children(Index::GroupMembers, period.group_id.as_uuid())?;

        let mut settlements = Vec::new();
        let mut created = 0;
        let mut existing = 0;
        for member in members.into_iter().filter(GroupMember::is_active) {
            let key = UniqueKey::MemberSettlement {
                period: period_id.as_uuid(),
                member: member.id.as_uuid(),
            };
            if let Some(id) = uow.find_unique(&key)? {
                settlements.push(uow.fetch::<Settlement>(id)?);
                existing += 1;
                continue;
            }

            let member_id = member.id;
            let activity = MemberActivity::load(&uow, member)?;
            let breakdown = activity.breakdown(&period, self.interest.as_ref());
            let settlement = Settlement::new(&period, member_id, breakdown, now);

            uow.claim_unique(&key, settlement.id.as_uuid())?;
            uow.put(&settlement)?;
            uow.link(
                Index::PeriodSettlements,
                period_id.as_uuid(),
                settlement.id.as_uuid(),
            );
            uow.link(
                Index::MemberSettlements,
                member_id.as_uuid(),
                settlement.id.as_uuid(),
            );
            tracing::debug!(
                period_id = %period_id,
                member_id = %member_id,
                savings = %breakdown.savings,
                interest = %breakdown.interest,
                penalties_applied = %breakdown.penalties_applied,
                penalties_waived = %breakdown.penalties_waived,
                total_due = %settlement.total_due,
                "Settlement created"
            );
            settlements.push(settlement);
            created += 1;
        }

        let all: Vec<Settlement> = uow.children(Index::PeriodSettlements, period_id.as_uuid())?;
        period.totals = PeriodTotals::from_settlements(&all);
        uow.put(&period)?;
        uow.commit()?;

        tracing::info!(
            period_id = %period_id,
            created,
            existing,
            interest = self.interest.name(),
            total_settlement_amount = %period.totals.total_settlement_amount,
            "Settlements generated"
        );

        Ok(GenerationReport {
            period,
            settlements,
            created,
            existing,
        })
    }

    /// Record a payment against a settlement and post it to the ledger
    pub fn record_payment(
        &self,
        settlement_id: SettlementId,
        request: SettlementPaymentRequest,
    ) -> Result<SettlementReceipt> {
        let SettlementPaymentRequest {
            amount,
            method,
            reference,
            notes,
            recorded_by,
        } = request;
        validate_method(&method)?;

        let mut uow = self.ledger.storage().begin();
        let mut settlement: Settlement = uow.fetch(settlement_id.as_uuid())?;
        let period: SettlementPeriod = uow.fetch(settlement.period_id.as_uuid())?;
        if let Err(err) = validation::validate_payment(&period, &settlement, amount) {
            tracing::warn!(
                settlement_id = %settlement_id,
                amount = %amount,
                pending = %settlement.amount_pending,
                error = %err,
                "Settlement payment rejected"
            );
            return Err(err);
        }

        let now = self.ledger.now();
        let today = now.date_naive();
        settlement.apply_payment(amount, today, now);
        uow.put(&settlement)?;

        let payment = SettlementPayment {
            id: SettlementPaymentId::generate(),
            settlement_id,
            amount,
            payment_date: today,
            payment_method: method.trim().to_string(),
            reference,
            notes,
            recorded_by: recorded_by.clone(),
            created_at: now,
        };
        uow.put(&payment)?;
        uow.link(
            Index::SettlementPayments,
            settlement_id.as_uuid(),
            payment.id.as_uuid(),
        );

        let transaction = Transaction::record(
            settlement.group_id,
            settlement.member_id,
            TransactionType::SettlementPayment,
            amount,
            settlement.amount_pending,
            format!("Settlement payment for {}", period.name),
            Reference::Settlement(settlement_id),
            Some(recorded_by),
            now,
        );
        post_transaction(&mut uow, &transaction)?;
        uow.commit()?;

        tracing::info!(
            settlement_id = %settlement_id,
            member_id = %settlement.member_id,
            amount = %amount,
            amount_pending = %settlement.amount_pending,
            status = %settlement.status,
            "Settlement payment recorded"
        );

        Ok(SettlementReceipt {
            settlement,
            payment,
            transaction,
        })
    }

    /// `active → closed`
    pub fn close_period(&self, period_id: PeriodId) -> Result<SettlementPeriod> {
        let mut uow = self.ledger.storage().begin();
        let mut period: SettlementPeriod = uow.fetch(period_id.as_uuid())?;
        validation::ensure_period_status(&period, PeriodStatus::Active, "close")?;

        period.status = PeriodStatus::Closed;
        period.closed_at = Some(self.ledger.now());
        uow.put(&period)?;
        uow.commit()?;

        tracing::info!(period_id = %period_id, name = %period.name, "Settlement period closed");
        Ok(period)
    }

    /// `closed → finalized`, refused while any settlement has nothing paid
    pub fn finalize_period(&self, period_id: PeriodId) -> Result<SettlementPeriod> {
        let mut uow = self.ledger.storage().begin();
        let mut period: SettlementPeriod = uow.fetch(period_id.as_uuid())?;
        validation::ensure_period_status(&period, PeriodStatus::Closed, "finalize")?;

        let settlements: Vec<Settlement> =
            uow.children(Index::PeriodSettlements, period_id.as_uuid())?;
        let count = settlements
            .iter()
            .filter(|s| s.status == SettlementStatus::Pending)
            .count();
        if count > 0 {
            tracing::warn!(
                period_id = %period_id,
                pending = count,
                "Finalization blocked by pending settlements"
            );
            return Err(Error::UnresolvedSettlements {
                period_id: period_id.as_uuid(),
                count,
            });
        }

        period.status = PeriodStatus::Finalized;
        period.finalized_at = Some(self.ledger.now());
        uow.put(&period)?;
        uow.commit()?;

        tracing::info!(
            period_id = %period_id,
            name = %period.name,
            settlements = settlements.len(),
            "Settlement period finalized"
        );
        Ok(period)
    }

    /// Read-only list of settlements that need attention
    pub fn validate_period_settlements(&self, period_id: PeriodId) -> Result<Vec<SettlementIssue>> {
        let settlements = self.period_settlements(period_id)?;
        let issues = validation::period_issues(&settlements, self.ledger.today());
        tracing::debug!(period_id = %period_id, issues = issues.len(), "Period validated");
        Ok(issues)
    }

    /// Get period
    pub fn period(&self, period_id: PeriodId) -> Result<SettlementPeriod> {
        Ok(self.ledger.storage().fetch(period_id.as_uuid())?)
    }

    /// Get settlement
    pub fn settlement(&self, settlement_id: SettlementId) -> Result<Settlement> {
        Ok(self.ledger.storage().fetch(settlement_id.as_uuid())?)
    }

    /// Periods of a group, oldest first
    pub fn group_periods(&self, group_id: GroupId) -> Result<Vec<SettlementPeriod>> {
        let mut periods: Vec<SettlementPeriod> = self
            .ledger
            .storage()
            .children(Index::GroupPeriods, group_id.as_uuid())?;
        periods.sort_by_key(|p| (p.created_at, p.start_date, p.id));
        Ok(periods)
    }

    /// Settlements of a period
    pub fn period_settlements(&self, period_id: PeriodId) -> Result<Vec<Settlement>> {
        Ok(self
            .ledger
            .storage()
            .children(Index::PeriodSettlements, period_id.as_uuid())?)
    }

    /// Settlements of a member across periods, by due date
    pub fn member_settlements(&self, member_id: MemberId) -> Result<Vec<Settlement>> {
        let mut settlements: Vec<Settlement> = self
            .ledger
            .storage()
            .children(Index::MemberSettlements, member_id.as_uuid())?;
        settlements.sort_by_key(|s| s.due_date);
        Ok(settlements)
    }

    /// A member's settlement for a period, if generated
    pub fn find_settlement(
        &self,
        period_id: PeriodId,
        member_id: MemberId,
    ) -> Result<Option<Settlement>> {
        let storage = self.ledger.storage();
        let key = UniqueKey::MemberSettlement {
            period: period_id.as_uuid(),
            member: member_id.as_uuid(),
        };
        match storage.find_unique(&key)? {
            Some(id) => Ok(Some(storage.fetch(id)?)),
            None => Ok(None),
        }
    }

    /// Payments on a settlement, newest first
    pub fn settlement_payments(&self, settlement_id: SettlementId) -> Result<Vec<SettlementPayment>> {
        let mut payments: Vec<SettlementPayment> = self
            .ledger
            .storage()
            .children(Index::SettlementPayments, settlement_id.as_uuid())?;
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(payments)
    }

    /// Settlement progress of a period
    pub fn period_summary(&self, period_id: PeriodId) -> Result<PeriodSummary> {
        let period = self.period(period_id)?;
        let settlements = self.period_settlements(period_id)?;
        Ok(summarize(&period, &settlements))
    }

    /// Time progress of a period against the ledger clock
    pub fn period_progress(&self, period_id: PeriodId) -> Result<PeriodProgress> {
        let period = self.period(period_id)?;
        let today = self.ledger.today();
        Ok(PeriodProgress {
            days_remaining: period.days_remaining(today),
            percentage_complete: period.percentage_complete(today),
        })
    }

    /// Summary of the given period, or of the group's latest one
    pub fn group_summary(
        &self,
        group_id: GroupId,
        period_id: Option<PeriodId>,
    ) -> Result<Option<GroupSettlementSummary>> {
        let period = match period_id {
            Some(id) => {
                let period = self.period(id)?;
                if period.group_id != group_id {
                    return Err(chama_ledger::Error::InvalidInput(format!(
                        "period {} does not belong to group {}",
                        id, group_id
                    ))
                    .into());
                }
                Some(period)
            }
            None => self.group_periods(group_id)?.pop(),
        };
        let Some(period) = period else {
            return Ok(None);
        };

        let settlements = self.period_settlements(period.id)?;
        let summary = summarize(&period, &settlements);
        let today = self.ledger.today();
        let progress = PeriodProgress {
            days_remaining: period.days_remaining(today),
            percentage_complete: period.percentage_complete(today),
        };
        Ok(Some(GroupSettlementSummary {
            period,
            summary,
            progress,
        }))
    }

    /// A member's statement for a period, `None` before generation
    pub fn member_statement(
        &self,
        period_id: PeriodId,
        member_id: MemberId,
    ) -> Result<Option<MemberStatement>> {
        let period = self.period(period_id)?;
        let Some(settlement) = self.find_settlement(period_id, member_id)? else {
            return Ok(None);
        };
        let payments = self
            .settlement_payments(settlement.id)?
            .into_iter()
            .map(|p| StatementPayment {
                amount: p.amount,
                date: p.payment_date,
                method: p.payment_method,
                reference: p.reference,
            })
            .collect();
        let today = self.ledger.today();

        Ok(Some(MemberStatement {
            member_id,
            period_name: period.name,
            start_date: period.start_date,
            end_date: period.end_date,
            breakdown: settlement.breakdown(),
            total_due: settlement.total_due,
            amount_paid: settlement.amount_paid,
            amount_pending: settlement.amount_pending,
            payments,
            status: settlement.effective_status(today),
            is_overdue: settlement.is_overdue(today),
            days_overdue: settlement.days_overdue(today),
        }))
    }
}

fn summarize(period: &SettlementPeriod, settlements: &[Settlement]) -> PeriodSummary {
    let total_members = settlements.len();
    let settled_members = settlements.iter().filter(|s| s.is_paid()).count();
    let settlement_percentage = if total_members == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(settled_members) / Decimal::from(total_members) * Decimal::ONE_HUNDRED)
            .round_dp(2)
    };
    PeriodSummary {
        total_members,
        settled_members,
        pending_members: total_members - settled_members,
        settlement_percentage,
        total_due: settlements.iter().map(|s| s.total_due).sum(),
        total_paid: settlements.iter().map(|s| s.amount_paid).sum(),
        total_pending: settlements.iter().map(|s| s.amount_pending).sum(),
        totals: period.totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chama_ledger::{ActorId, FixedClock, MemberRole, UserId};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine_at(today: NaiveDate) -> (SettlementEngine, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::on(today));
        let ledger = Arc::new(Ledger::in_memory(clock.clone()).unwrap());
        (SettlementEngine::with_ledger(ledger, Config::default()), clock)
    }

    fn treasurer() -> ActorId {
        ActorId::new("treasurer-1")
    }

    #[test]
    fn test_create_period_rejects_duplicate_name() {
        let (engine, _) = engine_at(date(2025, 1, 1));
        let group = GroupId::generate();
        engine
            .create_period(group, "Q1", date(2025, 1, 1), date(2025, 3, 31), None, None)
            .unwrap();

        let err = engine
            .create_period(group, " Q1 ", date(2025, 4, 1), date(2025, 6, 30), None, None)
            .unwrap_err();
        assert!(err.is_duplicate());

        // same name in another group is fine
        engine
            .create_period(GroupId::generate(), "Q1", date(2025, 1, 1), date(2025, 3, 31), None, None)
            .unwrap();
        assert_eq!(engine.group_periods(group).unwrap().len(), 1);
    }

    #[test]
    fn test_generate_skips_inactive_members() {
        let (engine, clock) = engine_at(date(2025, 1, 5));
        let group = GroupId::generate();
        let members = engine.ledger().members();
        let active = members.join(group, UserId::generate(), MemberRole::Member).unwrap();
        let suspended = members.join(group, UserId::generate(), MemberRole::Member).unwrap();
        members
            .set_status(suspended.id, chama_ledger::MemberStatus::Suspended)
            .unwrap();

        engine
            .ledger()
            .savings()
            .deposit(active.id, Money::from_major(300), None, None)
            .unwrap();
        clock.set_date(date(2025, 1, 10));

        let period = engine
            .create_period(group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
            .unwrap();
        let report = engine.generate_settlements(period.id).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.settlements[0].member_id, active.id);
        assert_eq!(report.settlements[0].total_due, Money::from_major(300));
        assert_eq!(report.period.totals.total_savings_collected, Money::from_major(300));
    }

    #[test]
    fn test_generate_requires_active_period() {
        let (engine, _) = engine_at(date(2025, 1, 1));
        let period = engine
            .create_period(GroupId::generate(), "Q1", date(2025, 1, 1), date(2025, 3, 31), None, None)
            .unwrap();
        engine.close_period(period.id).unwrap();
        assert!(matches!(
            engine.generate_settlements(period.id),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            engine.close_period(period.id),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn test_payment_posts_transaction() {
        let (engine, _) = engine_at(date(2025, 1, 10));
        let group = GroupId::generate();
        let member = engine
            .ledger()
            .members()
            .join(group, UserId::generate(), MemberRole::Member)
            .unwrap();
        engine
            .ledger()
            .savings()
            .deposit(member.id, Money::from_major(250), None, None)
            .unwrap();
        let period = engine
            .create_period(group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
            .unwrap();
        let settlement = engine.generate_settlements(period.id).unwrap().settlements[0].clone();

        let receipt = engine
            .record_payment(
                settlement.id,
                SettlementPaymentRequest::new(Money::from_major(100), "mpesa", treasurer())
                    .with_reference("QWE123"),
            )
            .unwrap();
        assert_eq!(receipt.settlement.status, SettlementStatus::Partial);
        assert_eq!(receipt.transaction.kind, TransactionType::SettlementPayment);
        assert_eq!(receipt.transaction.balance_after, Money::from_major(150));

        let posted = engine
            .ledger()
            .reference_transactions(Reference::Settlement(settlement.id))
            .unwrap();
        assert_eq!(posted.len(), 1);
        assert!(engine
            .ledger()
            .members()
            .reconcile(member.id)
            .unwrap()
            .is_clean());
    }

    #[test]
    fn test_group_summary_uses_latest_period() {
        let (engine, clock) = engine_at(date(2025, 1, 1));
        let group = GroupId::generate();
        assert!(engine.group_summary(group, None).unwrap().is_none());

        engine
            .create_period(group, "Q1", date(2025, 1, 1), date(2025, 3, 31), None, None)
            .unwrap();
        clock.advance_days(1);
        let q2 = engine
            .create_period(group, "Q2", date(2025, 4, 1), date(2025, 6, 30), None, None)
            .unwrap();

        let summary = engine.group_summary(group, None).unwrap().unwrap();
        assert_eq!(summary.period.id, q2.id);
        assert_eq!(summary.summary.total_members, 0);
        assert_eq!(summary.progress.percentage_complete, Decimal::ZERO);

        assert!(engine
            .group_summary(GroupId::generate(), Some(q2.id))
            .is_err());
    }
}
