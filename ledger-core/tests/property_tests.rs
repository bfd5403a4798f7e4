//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Savings identity: balance == deposits + interest - withdrawals >= 0
//! - Loan identity: remaining == principal - principal paid >= 0
//! - Charges: amount paid never exceeds the charge, allocation is month-ordered
//! - Member aggregates always reconcile with the ledger rows

use chama_ledger::{
    model::{allocate_charges, charge_schedule, LoanCharge},
    Error, FixedClock, GroupId, Ledger, LoanChargeStatus, LoanId, LoanPaymentRequest, LoanStatus,
    MemberId, MemberRole, Money, UserId,
};
use chrono::NaiveDate;
use proptest::prelude::*;
use std::sync::Arc;

/// Strategy for generating positive amounts in cents
fn amount_strategy() -> impl Strategy<Value = Money> {
    (1i64..1_000_000i64).prop_map(Money::from_cents)
}

#[derive(Debug, Clone)]
enum SavingsOp {
    Deposit(Money),
    Withdraw(Money),
    Interest(Money),
}

/// Strategy for generating savings operations
fn savings_op_strategy() -> impl Strategy<Value = SavingsOp> {
    prop_oneof![
        3 => amount_strategy().prop_map(SavingsOp::Deposit),
        3 => amount_strategy().prop_map(SavingsOp::Withdraw),
        1 => (0i64..10_000i64).prop_map(|c| SavingsOp::Interest(Money::from_cents(c))),
    ]
}

#[derive(Debug, Clone)]
struct PaymentPlan {
    principal: Money,
    charges: Money,
}

/// Strategy for generating loan payments (may overshoot on purpose)
fn payment_strategy() -> impl Strategy<Value = PaymentPlan> {
    (0i64..400_000i64, 0i64..50_000i64).prop_map(|(p, c)| PaymentPlan {
        principal: Money::from_cents(p),
        charges: Money::from_cents(c),
    })
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

/// Create test ledger with one member
fn create_test_ledger() -> (Ledger, MemberId) {
    let ledger = Ledger::in_memory(Arc::new(FixedClock::on(start_date()))).unwrap();
    let member = ledger
        .members()
        .join(GroupId::generate(), UserId::generate(), MemberRole::Member)
        .unwrap();
    (ledger, member.id)
}

fn disbursed_loan(
    ledger: &Ledger,
    member: MemberId,
    principal: Money,
    charge: Money,
    months: u32,
) -> LoanId {
    let loans = ledger.loans();
    let loan = loans
        .create_loan(member, principal, charge, months, None)
        .unwrap();
    loans.approve_loan(loan.id).unwrap();
    loans.disburse_loan(loan.id, None).unwrap();
    loan.id
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: any sequence of savings operations keeps the balance identity
    #[test]
    fn prop_savings_identity(ops in prop::collection::vec(savings_op_strategy(), 1..30)) {
        let (ledger, member) = create_test_ledger();
        let savings = ledger.savings();

        for op in ops {
            let result = match op {
                SavingsOp::Deposit(amount) => savings.deposit(member, amount, None, None),
                SavingsOp::Withdraw(amount) => savings.withdraw(member, amount, None, None),
                SavingsOp::Interest(amount) => savings.add_interest(member, amount, None),
            };
            match result {
                Ok(receipt) => {
                    prop_assert!(receipt.account.is_consistent());
                    prop_assert_eq!(receipt.transaction.balance_after, receipt.account.current_balance);
                }
                Err(Error::InsufficientBalance { requested, available, .. }) => {
                    prop_assert!(requested > available);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }

        let account = savings.account(member).unwrap();
        prop_assert!(account.is_consistent());
        prop_assert!(!account.current_balance.is_negative());
        prop_assert!(ledger.members().reconcile(member).unwrap().is_clean());
    }

    /// Property: loan balance identity holds and completion tracks a zero balance
    #[test]
    fn prop_loan_identity(
        principal in 1_000i64..2_000_000i64,
        charge in 0i64..20_000i64,
        months in 1u32..24,
        payments in prop::collection::vec(payment_strategy(), 1..20),
    ) {
        let (ledger, member) = create_test_ledger();
        let principal = Money::from_cents(principal);
        let loan_id = disbursed_loan(&ledger, member, principal, Money::from_cents(charge), months);

        for plan in payments {
            let before = ledger.loans().get(loan_id).unwrap();
            let result = ledger.loans().record_payment(
                loan_id,
                LoanPaymentRequest::new(plan.principal, plan.charges, "cash"),
            );
            match result {
                Ok(receipt) => {
                    prop_assert_eq!(
                        receipt.payment.total_paid,
                        receipt.payment.principal_paid + receipt.payment.charges_paid
                    );
                    let applied: Money = receipt.allocations.iter().map(|a| a.applied).sum();
                    prop_assert_eq!(applied, plan.charges);
                }
                Err(Error::Overpayment { .. }) | Err(Error::InvalidAmount { .. }) => {
                    // rejected payments change nothing
                    prop_assert_eq!(ledger.loans().get(loan_id).unwrap(), before);
                }
                Err(Error::InvalidState { .. }) => {
                    prop_assert_eq!(before.status, LoanStatus::Completed);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }

            let loan = ledger.loans().get(loan_id).unwrap();
            prop_assert_eq!(loan.remaining_balance, loan.principal_amount - loan.total_principal_paid);
            prop_assert!(!loan.remaining_balance.is_negative());
            prop_assert_eq!(loan.status == LoanStatus::Completed, loan.remaining_balance.is_zero());

            let charges = ledger.loans().charges(loan_id).unwrap();
            for c in &charges {
                prop_assert!(c.amount_paid <= c.charge_amount);
            }
            let paid = charges.iter().filter(|c| c.status == LoanChargeStatus::Paid).count() as u32;
            prop_assert_eq!(loan.months_paid, paid);
        }

        prop_assert!(ledger.members().reconcile(member).unwrap().is_clean());
    }

    /// Property: allocation fills strictly in month order
    #[test]
    fn prop_allocation_is_month_ordered(
        months in 1u32..24,
        charge in 1i64..100_000i64,
        pay in 0i64..2_400_000i64,
    ) {
        let issued = start_date();
        let loan_id = LoanId::generate();
        let mut charges: Vec<LoanCharge> = charge_schedule(issued, months)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, due)| LoanCharge::new(loan_id, i as u32 + 1, Money::from_cents(charge), due))
            .collect();
        let payable: Money = charges.iter().map(|c| c.outstanding()).sum();
        let pay = Money::from_cents(pay).min(payable);

        let allocations = allocate_charges(&mut charges, pay, issued);
        let applied: Money = allocations.iter().map(|a| a.applied).sum();
        prop_assert_eq!(applied, pay);

        // once a charge is not fully paid, every later charge is untouched
        let mut seen_unpaid = false;
        for c in &charges {
            if seen_unpaid {
                prop_assert_eq!(c.amount_paid, Money::ZERO);
            }
            if c.status != LoanChargeStatus::Paid {
                seen_unpaid = true;
            }
        }
    }

    /// Property: schedules have one charge per month, strictly increasing
    #[test]
    fn prop_schedule_monotonic(day in 1u32..=28, months in 1u32..=60) {
        let issued = NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        let due = charge_schedule(issued, months).unwrap();
        prop_assert_eq!(due.len(), months as usize);
        prop_assert!(due.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(due[0] > issued);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_full_member_lifecycle() {
        let (ledger, member) = create_test_ledger();

        ledger
            .savings()
            .deposit(member, Money::from_major(2_000), None, None)
            .unwrap();
        let loan = disbursed_loan(&ledger, member, Money::from_major(10_000), Money::from_major(500), 12);

        ledger
            .loans()
            .record_payment(
                loan,
                LoanPaymentRequest::new(Money::from_cents(83_333), Money::from_major(500), "cash"),
            )
            .unwrap();
        ledger
            .savings()
            .withdraw(member, Money::from_major(500), None, None)
            .unwrap();

        let m = ledger.members().get(member).unwrap();
        assert_eq!(m.totals.current_savings, Money::from_major(1_500));
        assert_eq!(m.totals.total_borrowed, Money::from_major(10_000));
        assert_eq!(m.totals.outstanding_loans, Money::from_cents(916_667));
        assert!(ledger.members().reconcile(member).unwrap().is_clean());

        let txns = ledger.member_transactions(member).unwrap();
        assert_eq!(txns.len(), 4);
    }

    #[test]
    fn test_deposits_stop_at_the_amount_ceiling() {
        let (ledger, member) = create_test_ledger();
        let savings = ledger.savings();

        assert!(matches!(
            savings.deposit(member, Money::new(rust_decimal::Decimal::MAX), None, None),
            Err(Error::InvalidAmount { .. })
        ));

        savings.deposit(member, Money::MAX, None, None).unwrap();
        assert!(matches!(
            savings.deposit(member, Money::from_cents(1), None, None),
            Err(Error::Overflow(_))
        ));
        assert!(matches!(
            savings.add_interest(member, Money::from_cents(1), None),
            Err(Error::Overflow(_))
        ));

        // the ledger is still writable and unchanged by the failures
        assert_eq!(savings.account(member).unwrap().current_balance, Money::MAX);
        assert_eq!(ledger.member_transactions(member).unwrap().len(), 1);
        savings.withdraw(member, Money::from_major(1), None, None).unwrap();
        assert!(ledger.members().reconcile(member).unwrap().is_clean());
    }

    #[test]
    fn test_loan_cost_past_the_ceiling_is_rejected() {
        let (ledger, member) = create_test_ledger();
        let loans = ledger.loans();

        assert!(matches!(
            loans.create_loan(
                member,
                Money::from_major(1_000),
                Money::new(rust_decimal::Decimal::MAX),
                12,
                None
            ),
            Err(Error::InvalidAmount { .. })
        ));
        assert!(matches!(
            loans.create_loan(member, Money::from_major(1_000), Money::MAX, 12, None),
            Err(Error::Overflow(_))
        ));
        assert!(loans.member_loans(member).unwrap().is_empty());

        let loan = loans
            .create_loan(member, Money::from_major(1_000), Money::from_major(100), 12, None)
            .unwrap();
        let summary = loans.loan_summary(loan.id).unwrap();
        assert_eq!(summary.total_loan_cost, Money::from_major(2_200));
    }

    #[test]
    fn test_concurrent_withdrawals_never_overdraw() {
        let (ledger, member) = create_test_ledger();
        ledger
            .savings()
            .deposit(member, Money::from_major(1_000), None, None)
            .unwrap();

        let threads = 8;
        let per_thread = 5;
        let amount = Money::from_major(30);
        let barrier = std::sync::Barrier::new(threads);

        let succeeded: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let savings = ledger.savings();
                        (0..per_thread)
                            .filter(|_| match savings.withdraw(member, amount, None, None) {
                                Ok(_) => true,
                                Err(Error::InsufficientBalance { .. }) => false,
                                Err(e) => panic!("unexpected error: {}", e),
                            })
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        // 40 attempts of 30 against 1000: exactly 33 fit
        assert_eq!(succeeded, 33);
        let account = ledger.savings().account(member).unwrap();
        assert_eq!(account.current_balance, Money::from_major(10));
        assert!(account.is_consistent());
        assert_eq!(ledger.member_transactions(member).unwrap().len(), 1 + succeeded);
        assert!(ledger.members().reconcile(member).unwrap().is_clean());
    }

    #[cfg(feature = "rocksdb")]
    #[test]
    fn test_rocksdb_ledger_persists_across_reopen() {
        use chama_ledger::config::StorageBackend;

        let dir = tempfile::tempdir().unwrap();
        let mut config = chama_ledger::Config::default();
        config.data_dir = dir.path().to_path_buf();
        config.storage = StorageBackend::Rocksdb;

        let member = {
            let ledger = Ledger::with_clock(config.clone(), Arc::new(FixedClock::on(start_date()))).unwrap();
            let member = ledger
                .members()
                .join(GroupId::generate(), UserId::generate(), MemberRole::Member)
                .unwrap();
            ledger
                .savings()
                .deposit(member.id, Money::from_major(75), None, None)
                .unwrap();
            member.id
        };

        let ledger = Ledger::with_clock(config, Arc::new(FixedClock::on(start_date()))).unwrap();
        let account = ledger.savings().account(member).unwrap();
        assert_eq!(account.current_balance, Money::from_major(75));
        assert!(ledger.members().reconcile(member).unwrap().is_clean());
    }
}
