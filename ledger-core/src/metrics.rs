//! Metrics collection for observability
//!
//! Counters live in a registry owned by the [`Metrics`] instance rather than
//! the process-wide default, so several ledgers (and tests) can coexist.
//!
//! # Metrics
//!
//! - `ledger_loans_total{event}` - Loans created/disbursed/completed/defaulted
//! - `ledger_loan_payments_total` - Loan payments recorded
//! - `ledger_savings_operations_total{operation,outcome}` - Deposits, withdrawals, interest
//! - `ledger_penalties_total{event}` - Penalties applied/waived/reversed
//! - `ledger_charges_overdue_total` - Charges persisted as overdue by sweeps

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Loan lifecycle events
    pub loans: IntCounterVec,

    /// Loan payments recorded
    pub loan_payments: IntCounter,

    /// Savings operations by outcome
    pub savings_operations: IntCounterVec,

    /// Penalty events
    pub penalties: IntCounterVec,

    /// Charges marked overdue
    pub charges_overdue: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let loans = IntCounterVec::new(
            Opts::new("ledger_loans_total", "Loan lifecycle events"),
            &["event"],
        )?;
        registry.register(Box::new(loans.clone()))?;

        let loan_payments =
            IntCounter::new("ledger_loan_payments_total", "Loan payments recorded")?;
        registry.register(Box::new(loan_payments.clone()))?;

        let savings_operations = IntCounterVec::new(
            Opts::new(
                "ledger_savings_operations_total",
                "Savings operations by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(savings_operations.clone()))?;

        let penalties = IntCounterVec::new(
            Opts::new("ledger_penalties_total", "Penalty events"),
            &["event"],
        )?;
        registry.register(Box::new(penalties.clone()))?;

        let charges_overdue = IntCounter::new(
            "ledger_charges_overdue_total",
            "Loan charges persisted as overdue",
        )?;
        registry.register(Box::new(charges_overdue.clone()))?;

        Ok(Self {
            loans,
            loan_payments,
            savings_operations,
            penalties,
            charges_overdue,
            registry,
        })
    }

    /// Record a loan lifecycle event ("created", "disbursed", ...)
    pub fn record_loan(&self, event: &str) {
        self.loans.with_label_values(&[event]).inc();
    }

    /// Record a loan payment
    pub fn record_loan_payment(&self) {
        self.loan_payments.inc();
    }

    /// Record a savings operation
    pub fn record_savings(&self, operation: &str, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        self.savings_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Record a penalty event ("applied", "waived", "reversed")
    pub fn record_penalty(&self, event: &str) {
        self.penalties.with_label_values(&[event]).inc();
    }

    /// Record charges flipped to overdue
    pub fn record_charges_overdue(&self, count: usize) {
        self.charges_overdue.inc_by(count as u64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
