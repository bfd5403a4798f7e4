//! End-to-end settlement flow over an in-memory ledger

use chama_ledger::{
    ActorId, FixedClock, GroupId, GroupMember, Ledger, LoanPaymentRequest, MemberRole, Money,
    SettlementId, UserId,
};
use chama_settlement::{
    Config, Error, InterestMode, IssueKind, SettlementEngine, SettlementPaymentRequest,
    SettlementReceipt, SettlementStatus,
};
use chrono::NaiveDate;
use proptest::prelude::*;
use std::sync::Arc;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn treasurer() -> ActorId {
    ActorId::new("treasurer-1")
}

struct Fixture {
    engine: SettlementEngine,
    clock: Arc<FixedClock>,
    group: GroupId,
}

impl Fixture {
    fn new(today: NaiveDate, interest: InterestMode) -> Self {
        let clock = Arc::new(FixedClock::on(today));
        let ledger = Arc::new(Ledger::in_memory(clock.clone()).unwrap());
        let config = Config {
            interest,
            ..Config::default()
        };
        Self {
            engine: SettlementEngine::with_ledger(ledger, config),
            clock,
            group: GroupId::generate(),
        }
    }

    fn ledger(&self) -> &Ledger {
        self.engine.ledger()
    }

    fn join(&self) -> GroupMember {
        self.ledger()
            .members()
            .join(self.group, UserId::generate(), MemberRole::Member)
            .unwrap()
    }

    fn deposit(&self, member: &GroupMember, major: i64) {
        self.ledger()
            .savings()
            .deposit(member.id, Money::from_major(major), None, None)
            .unwrap();
    }

    fn pay(
        &self,
        settlement: SettlementId,
        cents: i64,
    ) -> chama_settlement::Result<SettlementReceipt> {
        self.engine.record_payment(
            settlement,
            SettlementPaymentRequest::new(Money::from_cents(cents), "cash", treasurer()),
        )
    }
}

#[test]
fn test_breakdown_from_ledger_activity() {
    let fx = Fixture::new(date(2025, 1, 5), InterestMode::OwnLoanCharges);
    let saver = fx.join();
    let borrower = fx.join();

    fx.deposit(&saver, 500);
    fx.deposit(&borrower, 200);

    let penalties = fx.ledger().penalties();
    penalties
        .apply_violation_penalty(borrower.id, Money::from_major(50), "missed meeting")
        .unwrap();
    let waived = penalties
        .apply_violation_penalty(borrower.id, Money::from_major(20), "late arrival")
        .unwrap();
    penalties
        .waive_penalty(waived.id, "first offence", treasurer())
        .unwrap();

    let loans = fx.ledger().loans();
    let loan = loans
        .create_loan(borrower.id, Money::from_major(1_000), Money::from_major(50), 3, None)
        .unwrap();
    loans.approve_loan(loan.id).unwrap();
    loans.disburse_loan(loan.id, None).unwrap();
    fx.clock.set_date(date(2025, 1, 20));
    loans
        .record_payment(
            loan.id,
            LoanPaymentRequest::new(Money::ZERO, Money::from_major(50), "cash"),
        )
        .unwrap();

    // outside the period
    fx.clock.set_date(date(2025, 2, 2));
    fx.deposit(&saver, 999);

    let period = fx
        .engine
        .create_period(fx.group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
        .unwrap();
    let report = fx.engine.generate_settlements(period.id).unwrap();
    assert_eq!(report.created, 2);

    let saver_s = fx.engine.find_settlement(period.id, saver.id).unwrap().unwrap();
    assert_eq!(saver_s.original_savings, Money::from_major(500));
    assert_eq!(saver_s.total_due, Money::from_major(500));
    assert_eq!(saver_s.notes.as_deref(), Some("Savings: 500.00"));

    let borrower_s = fx
        .engine
        .find_settlement(period.id, borrower.id)
        .unwrap()
        .unwrap();
    assert_eq!(borrower_s.original_savings, Money::from_major(200));
    assert_eq!(borrower_s.interest_earned, Money::from_major(50));
    assert_eq!(borrower_s.penalties_applied, Money::from_major(50));
    assert_eq!(borrower_s.penalties_waived, Money::from_major(20));
    // 200 + 50 + (50 - 20)
    assert_eq!(borrower_s.total_due, Money::from_major(280));

    let totals = report.period.totals;
    assert_eq!(totals.total_savings_collected, Money::from_major(700));
    assert_eq!(totals.total_interest_earned, Money::from_major(50));
    assert_eq!(totals.total_penalties_applied, Money::from_major(50));
    assert_eq!(totals.total_settlement_amount, Money::from_major(780));
}

#[test]
fn test_generation_is_idempotent() {
    let fx = Fixture::new(date(2025, 1, 5), InterestMode::None);
    let a = fx.join();
    let b = fx.join();
    fx.deposit(&a, 100);
    fx.deposit(&b, 40);

    let period = fx
        .engine
        .create_period(fx.group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
        .unwrap();
    let first = fx.engine.generate_settlements(period.id).unwrap();

    // later activity does not change existing settlements
    fx.deposit(&a, 1_000);
    let second = fx.engine.generate_settlements(period.id).unwrap();

    assert_eq!(first.created, 2);
    assert_eq!(second.created, 0);
    assert_eq!(second.existing, 2);
    assert_eq!(first.period.totals, second.period.totals);

    let mut first_ids: Vec<_> = first.settlements.iter().map(|s| s.id).collect();
    let mut second_ids: Vec<_> = second.settlements.iter().map(|s| s.id).collect();
    first_ids.sort();
    second_ids.sort();
    assert_eq!(first_ids, second_ids);
    assert_eq!(fx.engine.period_settlements(period.id).unwrap().len(), 2);

    // a member joining later gets a settlement on the next run
    let late = fx.join();
    let third = fx.engine.generate_settlements(period.id).unwrap();
    assert_eq!(third.created, 1);
    assert!(fx.engine.find_settlement(period.id, late.id).unwrap().is_some());
}

#[test]
fn test_concurrent_generation_creates_one_settlement_per_member() {
    let fx = Fixture::new(date(2025, 1, 5), InterestMode::None);
    let members: Vec<_> = (0..5).map(|_| fx.join()).collect();
    for (i, member) in members.iter().enumerate() {
        fx.deposit(member, 100 * (i as i64 + 1));
    }
    let period = fx
        .engine
        .create_period(fx.group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
        .unwrap();

    let barrier = std::sync::Barrier::new(6);
    let reports: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    fx.engine.generate_settlements(period.id).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(reports.iter().map(|r| r.created).sum::<usize>(), members.len());
    assert!(reports
        .iter()
        .all(|r| r.created + r.existing == members.len()));

    let settlements = fx.engine.period_settlements(period.id).unwrap();
    assert_eq!(settlements.len(), members.len());
    for member in &members {
        assert!(fx.engine.find_settlement(period.id, member.id).unwrap().is_some());
    }

    let stored = fx.engine.period(period.id).unwrap();
    assert_eq!(stored.totals.total_settlement_amount, Money::from_major(1_500));
    assert_eq!(stored.totals.total_savings_collected, Money::from_major(1_500));
    assert!(reports.iter().all(|r| r.period.totals == stored.totals));
}

#[test]
fn test_finalize_blocked_until_paid() {
    let fx = Fixture::new(date(2025, 1, 5), InterestMode::None);
    let member = fx.join();
    fx.deposit(&member, 500);

    let period = fx
        .engine
        .create_period(fx.group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
        .unwrap();
    let settlement = fx.engine.generate_settlements(period.id).unwrap().settlements[0].clone();
    assert_eq!(settlement.total_due, Money::from_major(500));

    // finalize needs a closed period
    assert!(matches!(
        fx.engine.finalize_period(period.id),
        Err(Error::InvalidState { .. })
    ));

    fx.engine.close_period(period.id).unwrap();
    match fx.engine.finalize_period(period.id) {
        Err(Error::UnresolvedSettlements { count, .. }) => assert_eq!(count, 1),
        other => panic!("expected UnresolvedSettlements, got {:?}", other),
    }

    // payments still accepted while closed
    fx.pay(settlement.id, 50_000).unwrap();
    let finalized = fx.engine.finalize_period(period.id).unwrap();
    assert!(finalized.finalized_at.is_some());

    // terminal
    assert!(matches!(
        fx.engine.close_period(period.id),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn test_partial_payments_and_statement() {
    let fx = Fixture::new(date(2025, 1, 5), InterestMode::None);
    let member = fx.join();
    fx.deposit(&member, 300);

    let period = fx
        .engine
        .create_period(fx.group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
        .unwrap();
    let settlement = fx.engine.generate_settlements(period.id).unwrap().settlements[0].clone();

    let receipt = fx.pay(settlement.id, 10_000).unwrap();
    assert_eq!(receipt.settlement.status, SettlementStatus::Partial);
    assert_eq!(receipt.settlement.amount_pending, Money::from_major(200));

    assert!(matches!(
        fx.pay(settlement.id, 20_001),
        Err(Error::ExceedsPending { .. })
    ));
    assert!(matches!(
        fx.pay(settlement.id, 0),
        Err(Error::InvalidAmount { .. })
    ));

    // past the due date with 200 pending
    fx.clock.set_date(date(2025, 2, 4));
    let statement = fx
        .engine
        .member_statement(period.id, member.id)
        .unwrap()
        .unwrap();
    assert_eq!(statement.status, SettlementStatus::Overdue);
    assert!(statement.is_overdue);
    assert_eq!(statement.days_overdue, Some(4));
    assert_eq!(statement.payments.len(), 1);

    let issues = fx.engine.validate_period_settlements(period.id).unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, IssueKind::Overdue);
    assert_eq!(issues[0].amount, Money::from_major(200));

    fx.clock.advance_days(1);
    let receipt = fx.pay(settlement.id, 20_000).unwrap();
    assert!(receipt.settlement.is_paid());
    assert_eq!(receipt.settlement.payment_date, Some(date(2025, 2, 5)));

    let statement = fx
        .engine
        .member_statement(period.id, member.id)
        .unwrap()
        .unwrap();
    assert_eq!(statement.status, SettlementStatus::Paid);
    assert!(!statement.is_overdue);
    // newest first
    assert_eq!(statement.payments[0].amount, Money::from_major(200));
    assert_eq!(statement.payments[1].amount, Money::from_major(100));

    let summary = fx.engine.period_summary(period.id).unwrap();
    assert_eq!(summary.settled_members, 1);
    assert_eq!(summary.total_paid, Money::from_major(300));
    assert!(summary.total_pending.is_zero());
    assert!(fx.engine.validate_period_settlements(period.id).unwrap().is_empty());
}

#[test]
fn test_finalized_period_rejects_payments() {
    let fx = Fixture::new(date(2025, 1, 5), InterestMode::None);
    let a = fx.join();
    let b = fx.join();
    fx.deposit(&a, 100);
    fx.deposit(&b, 100);

    let period = fx
        .engine
        .create_period(fx.group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
        .unwrap();
    let report = fx.engine.generate_settlements(period.id).unwrap();
    for s in &report.settlements {
        fx.pay(s.id, 5_000).unwrap();
    }
    fx.engine.close_period(period.id).unwrap();
    // partially paid settlements do not block finalization
    fx.engine.finalize_period(period.id).unwrap();

    assert!(matches!(
        fx.pay(report.settlements[0].id, 100),
        Err(Error::InvalidState { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: pending == max(0, due - paid), paid iff pending is zero
    #[test]
    fn prop_pending_identity(
        due_cents in 1i64..1_000_000i64,
        payments in prop::collection::vec(1i64..400_000i64, 1..12),
    ) {
        let fx = Fixture::new(date(2025, 1, 5), InterestMode::None);
        let member = fx.join();
        fx.ledger()
            .savings()
            .deposit(member.id, Money::from_cents(due_cents), None, None)
            .unwrap();
        let period = fx
            .engine
            .create_period(fx.group, "January", date(2025, 1, 1), date(2025, 1, 31), None, None)
            .unwrap();
        let settlement = fx.engine.generate_settlements(period.id).unwrap().settlements[0].clone();

        for cents in payments {
            let before = fx.engine.settlement(settlement.id).unwrap();
            match fx.pay(settlement.id, cents) {
                Ok(_) => {}
                Err(Error::ExceedsPending { pending, .. }) => {
                    prop_assert!(Money::from_cents(cents) > pending);
                    prop_assert_eq!(fx.engine.settlement(settlement.id).unwrap(), before);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }

            let s = fx.engine.settlement(settlement.id).unwrap();
            prop_assert_eq!(s.amount_pending, s.total_due.saturating_sub(s.amount_paid));
            prop_assert_eq!(s.is_paid(), s.amount_pending.is_zero());
            prop_assert!(s.amount_paid <= s.total_due);
        }
    }
}
