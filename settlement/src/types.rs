//! Core types for the settlement engine

use chama_ledger::{
    storage::{Record, Table},
    ActorId, GroupId, MemberId, Money, PeriodId, SettlementId, SettlementPaymentId,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Settlement period lifecycle, strictly forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PeriodStatus {
    /// Open for settlement generation
    Active = 1,
    /// No new settlements, payments still accepted
    Closed = 2,
    /// Locked
    Finalized = 3,
}

impl PeriodStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Active => "active",
            PeriodStatus::Closed => "closed",
            PeriodStatus::Finalized => "finalized",
        }
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregates recomputed from a period's settlements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotals {
    /// Σ original savings
    pub total_savings_collected: Money,
    /// Σ interest earned
    pub total_interest_earned: Money,
    /// Σ penalties applied (unwaived)
    pub total_penalties_applied: Money,
    /// Σ total due
    pub total_settlement_amount: Money,
}

impl PeriodTotals {
    /// Sum over a set of settlements
    pub fn from_settlements<'a>(settlements: impl IntoIterator<Item = &'a Settlement>) -> Self {
        settlements
            .into_iter()
            .fold(PeriodTotals::default(), |mut totals, s| {
                totals.total_savings_collected += s.original_savings;
                totals.total_interest_earned += s.interest_earned;
                totals.total_penalties_applied += s.penalties_applied;
                totals.total_settlement_amount += s.total_due;
                totals
            })
    }
}

/// Settlement period of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPeriod {
    /// Period id
    pub id: PeriodId,

    /// Owning group
    pub group_id: GroupId,

    /// Unique per group
    pub name: String,

    /// First day (inclusive)
    pub start_date: NaiveDate,

    /// Last day (inclusive), also the settlement due date
    pub end_date: NaiveDate,

    /// Lifecycle status
    pub status: PeriodStatus,

    /// Optional group savings target
    pub savings_target: Option<Money>,

    /// Aggregates over the period's settlements
    pub totals: PeriodTotals,

    /// Free-form notes
    pub notes: Option<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// When the period was closed
    pub closed_at: Option<DateTime<Utc>>,

    /// When the period was finalized
    pub finalized_at: Option<DateTime<Utc>>,
}

impl SettlementPeriod {
    /// True when `date` falls inside the period
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// Whole days until the end date, zero once it has passed
    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.end_date - today).num_days().max(0)
    }

    /// Elapsed share of the period in percent, clamped to 0..=100
    pub fn percentage_complete(&self, today: NaiveDate) -> Decimal {
        if today <= self.start_date {
            return Decimal::ZERO;
        }
        if today >= self.end_date {
            return Decimal::ONE_HUNDRED;
        }
        let total = (self.end_date - self.start_date).num_days();
        let elapsed = (today - self.start_date).num_days();
        (Decimal::from(elapsed) / Decimal::from(total) * Decimal::ONE_HUNDRED).round_dp(2)
    }
}

impl Record for SettlementPeriod {
    const TABLE: Table = Table::SettlementPeriods;
    const ENTITY: &'static str = "settlement period";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

/// Settlement status
///
/// `Overdue` is never stored; it is derived from the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Nothing paid yet
    Pending,
    /// Some paid
    Partial,
    /// Fully paid
    Paid,
    /// Due date passed with an amount pending
    Overdue,
}

impl SettlementStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Partial => "partial",
            SettlementStatus::Paid => "paid",
            SettlementStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a member owes for a period, before any payment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementBreakdown {
    /// Deposits dated within the period
    pub savings: Money,
    /// Interest from the configured strategy
    pub interest: Money,
    /// Unwaived penalties applied within the period
    pub penalties_applied: Money,
    /// Waived penalties applied within the period
    pub penalties_waived: Money,
}

impl SettlementBreakdown {
    /// `applied - waived`
    pub fn net_penalties(&self) -> Money {
        self.penalties_applied - self.penalties_waived
    }

    /// `max(0, savings + interest + net penalties)`
    pub fn total_due(&self) -> Money {
        (self.savings + self.interest + self.net_penalties()).floor_zero()
    }

    /// Human-readable summary, components joined by `" | "`
    pub fn notes(&self) -> String {
        let parts = [
            ("Savings", self.savings),
            ("Interest earned", self.interest),
            ("Penalties", self.penalties_applied),
            ("Penalties waived", self.penalties_waived),
        ];
        parts
            .iter()
            .filter(|(_, amount)| amount.is_positive())
            .map(|(label, amount)| format!("{}: {}", label, amount))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// One member's settlement for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement id
    pub id: SettlementId,

    /// Period
    pub period_id: PeriodId,

    /// Group of the period
    pub group_id: GroupId,

    /// Member
    pub member_id: MemberId,

    /// Deposits within the period
    pub original_savings: Money,

    /// Interest component
    pub interest_earned: Money,

    /// Unwaived penalties within the period
    pub penalties_applied: Money,

    /// Waived penalties within the period
    pub penalties_waived: Money,

    /// Amount owed
    pub total_due: Money,

    /// Paid so far
    pub amount_paid: Money,

    /// `max(0, total_due - amount_paid)`
    pub amount_pending: Money,

    /// Stored status (never `Overdue`)
    pub status: SettlementStatus,

    /// Period end date
    pub due_date: NaiveDate,

    /// Date the settlement became fully paid
    pub payment_date: Option<NaiveDate>,

    /// Breakdown summary
    pub notes: Option<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    /// New settlement from a computed breakdown. Nothing owed means paid.
    pub fn new(
        period: &SettlementPeriod,
        member_id: MemberId,
        breakdown: SettlementBreakdown,
        now: DateTime<Utc>,
    ) -> Self {
        let total_due = breakdown.total_due();
        let notes = breakdown.notes();
        let status = if total_due.is_zero() {
            SettlementStatus::Paid
        } else {
            SettlementStatus::Pending
        };
        Self {
            id: SettlementId::generate(),
            period_id: period.id,
            group_id: period.group_id,
            member_id,
            original_savings: breakdown.savings,
            interest_earned: breakdown.interest,
            penalties_applied: breakdown.penalties_applied,
            penalties_waived: breakdown.penalties_waived,
            total_due,
            amount_paid: Money::ZERO,
            amount_pending: total_due,
            status,
            due_date: period.end_date,
            payment_date: None,
            notes: if notes.is_empty() { None } else { Some(notes) },
            created_at: now,
            updated_at: now,
        }
    }

    /// Components the settlement was built from
    pub fn breakdown(&self) -> SettlementBreakdown {
        SettlementBreakdown {
            savings: self.original_savings,
            interest: self.interest_earned,
            penalties_applied: self.penalties_applied,
            penalties_waived: self.penalties_waived,
        }
    }

    /// Apply a payment already validated against `amount_pending`
    pub fn apply_payment(&mut self, amount: Money, today: NaiveDate, now: DateTime<Utc>) {
        self.amount_paid += amount;
        self.amount_pending = self.total_due.saturating_sub(self.amount_paid);
        if self.amount_pending.is_zero() {
            self.status = SettlementStatus::Paid;
            self.payment_date = Some(today);
        } else {
            self.status = SettlementStatus::Partial;
        }
        self.updated_at = now;
    }

    /// Fully paid
    pub fn is_paid(&self) -> bool {
        self.status == SettlementStatus::Paid
    }

    /// Past due with something still pending
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.due_date < today && self.amount_pending.is_positive()
    }

    /// Days past due, `None` when not overdue
    pub fn days_overdue(&self, today: NaiveDate) -> Option<i64> {
        self.is_overdue(today)
            .then(|| (today - self.due_date).num_days())
    }

    /// Status with overdue evaluated against `today`
    pub fn effective_status(&self, today: NaiveDate) -> SettlementStatus {
        if self.is_overdue(today) {
            SettlementStatus::Overdue
        } else {
            self.status
        }
    }
}

impl Record for Settlement {
    const TABLE: Table = Table::Settlements;
    const ENTITY: &'static str = "settlement";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

/// Append-only payment against a settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPayment {
    /// Payment id
    pub id: SettlementPaymentId,

    /// Settlement paid
    pub settlement_id: SettlementId,

    /// Amount
    pub amount: Money,

    /// Payment date
    pub payment_date: NaiveDate,

    /// Free-form method label
    pub payment_method: String,

    /// External reference (receipt number, transfer id)
    pub reference: Option<String>,

    /// Notes
    pub notes: Option<String>,

    /// Who recorded it
    pub recorded_by: ActorId,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Record for SettlementPayment {
    const TABLE: Table = Table::SettlementPayments;
    const ENTITY: &'static str = "settlement payment";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

/// Payment request for [`record_payment`](crate::SettlementEngine::record_payment)
#[derive(Debug, Clone)]
pub struct SettlementPaymentRequest {
    /// Amount, positive and at most the pending amount
    pub amount: Money,
    /// Method label
    pub method: String,
    /// External reference
    pub reference: Option<String>,
    /// Notes
    pub notes: Option<String>,
    /// Who records it
    pub recorded_by: ActorId,
}

impl SettlementPaymentRequest {
    /// Payment with no reference or notes
    pub fn new(amount: Money, method: impl Into<String>, recorded_by: ActorId) -> Self {
        Self {
            amount,
            method: method.into(),
            reference: None,
            notes: None,
            recorded_by,
        }
    }

    /// Attach an external reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Attach notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Result of a settlement payment
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    /// Settlement after the payment
    pub settlement: Settlement,
    /// Stored payment
    pub payment: SettlementPayment,
    /// Ledger transaction emitted
    pub transaction: chama_ledger::Transaction,
}

/// Result of settlement generation
#[derive(Debug, Clone)]
pub struct GenerationReport {
    /// Period with recomputed totals
    pub period: SettlementPeriod,
    /// Settlements of every active member
    pub settlements: Vec<Settlement>,
    /// Newly created
    pub created: usize,
    /// Already present
    pub existing: usize,
}

/// Kind of problem found before finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Something is due and nothing was paid
    NoPaymentRecorded,
    /// Past due with an amount pending
    Overdue,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::NoPaymentRecorded => f.write_str("No payment recorded"),
            IssueKind::Overdue => f.write_str("Overdue settlement"),
        }
    }
}

/// One problem with one settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementIssue {
    /// Settlement
    pub settlement_id: SettlementId,
    /// Member
    pub member_id: MemberId,
    /// Problem
    pub kind: IssueKind,
    /// Total due for `NoPaymentRecorded`, pending amount for `Overdue`
    pub amount: Money,
    /// Days past due for `Overdue`
    pub days_overdue: Option<i64>,
}

/// Settlement progress of a period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSummary {
    /// Settlements in the period
    pub total_members: usize,
    /// Fully paid
    pub settled_members: usize,
    /// Not fully paid
    pub pending_members: usize,
    /// Settled share in percent
    pub settlement_percentage: Decimal,
    /// Σ total due
    pub total_due: Money,
    /// Σ paid
    pub total_paid: Money,
    /// Σ pending
    pub total_pending: Money,
    /// Stored aggregates
    pub totals: PeriodTotals,
}

/// Time progress of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodProgress {
    /// Days until the end date
    pub days_remaining: i64,
    /// Elapsed share in percent
    pub percentage_complete: Decimal,
}

/// Group-level view of one period
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSettlementSummary {
    /// Period described
    pub period: SettlementPeriod,
    /// Progress summary
    pub summary: PeriodSummary,
    /// Time progress
    pub progress: PeriodProgress,
}

/// Payment line in a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementPayment {
    /// Amount
    pub amount: Money,
    /// Date
    pub date: NaiveDate,
    /// Method
    pub method: String,
    /// External reference
    pub reference: Option<String>,
}

/// A member's view of their settlement
#[derive(Debug, Clone, PartialEq)]
pub struct MemberStatement {
    /// Member
    pub member_id: MemberId,
    /// Period name
    pub period_name: String,
    /// Period start
    pub start_date: NaiveDate,
    /// Period end
    pub end_date: NaiveDate,
    /// Breakdown
    pub breakdown: SettlementBreakdown,
    /// Total due
    pub total_due: Money,
    /// Paid so far
    pub amount_paid: Money,
    /// Still pending
    pub amount_pending: Money,
    /// Payments, newest first
    pub payments: Vec<StatementPayment>,
    /// Status with overdue applied
    pub status: SettlementStatus,
    /// Past due with something pending
    pub is_overdue: bool,
    /// Days past due
    pub days_overdue: Option<i64>,
}
