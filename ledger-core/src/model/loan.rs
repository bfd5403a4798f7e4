//! Loans, their monthly charge schedule, and payment events
//!
//! # Lifecycle
//!
//! ```text
//! pending → approved → active → completed
//!                        └────→ defaulted
//! ```
//!
//! Disbursement is the activation step: it stamps `issued_at`, fixes the
//! maturity date and materializes one [`LoanCharge`] per month.

use crate::{
    error::{Error, Result},
    money::Money,
    storage::{Record, Table},
    types::{ActorId, ChargeId, GroupId, LoanId, LoanPaymentId, MemberId},
};
use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// Requested, awaiting approval
    Pending,
    /// Approved, awaiting disbursement
    Approved,
    /// Disbursed and being repaid
    Active,
    /// Principal fully repaid
    Completed,
    /// Written off with a balance outstanding
    Defaulted,
}

impl LoanStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal loan to a group member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    /// Loan id
    pub id: LoanId,

    /// Group
    pub group_id: GroupId,

    /// Borrower
    pub member_id: MemberId,

    /// Amount lent
    pub principal_amount: Money,

    /// Fixed fee due every month of the schedule
    pub monthly_charge: Money,

    /// Principal still owed
    pub remaining_balance: Money,

    /// Schedule length
    pub duration_months: u32,

    /// Number of fully paid charges
    pub months_paid: u32,

    /// Charges collected so far
    pub total_charged: Money,

    /// Principal collected so far
    pub total_principal_paid: Money,

    /// Status
    pub status: LoanStatus,

    /// Free-form notes
    pub notes: Option<String>,

    /// Request time
    pub created_at: DateTime<Utc>,

    /// Approval time
    pub approved_at: Option<DateTime<Utc>>,

    /// Disbursement date
    pub issued_at: Option<NaiveDate>,

    /// `issued_at` + `duration_months`
    pub maturity_date: Option<NaiveDate>,

    /// Date the principal reached zero
    pub paid_off_at: Option<NaiveDate>,

    /// Default time
    pub defaulted_at: Option<DateTime<Utc>>,

    /// Why the loan was defaulted
    pub default_reason: Option<String>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Pending loan with the full principal outstanding
    pub fn new(
        group_id: GroupId,
        member_id: MemberId,
        principal_amount: Money,
        monthly_charge: Money,
        duration_months: u32,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LoanId::generate(),
            group_id,
            member_id,
            principal_amount,
            monthly_charge,
            remaining_balance: principal_amount,
            duration_months,
            months_paid: 0,
            total_charged: Money::ZERO,
            total_principal_paid: Money::ZERO,
            status: LoanStatus::Pending,
            notes,
            created_at: now,
            approved_at: None,
            issued_at: None,
            maturity_date: None,
            paid_off_at: None,
            defaulted_at: None,
            default_reason: None,
            updated_at: now,
        }
    }

    /// Disbursed and not yet closed
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// Completed with nothing left to pay
    pub fn is_fully_paid(&self) -> bool {
        self.status == LoanStatus::Completed && self.remaining_balance.is_zero()
    }

    /// Principal plus every scheduled charge
    pub fn total_loan_cost(&self) -> Result<Money> {
        self.monthly_charge
            .checked_mul(self.duration_months)?
            .checked_add(self.principal_amount)
    }

    /// Share of principal repaid, in percent
    pub fn payment_progress(&self) -> Decimal {
        self.total_principal_paid.percent_of(self.principal_amount)
    }

    /// `InvalidState` unless the loan is in `expected`
    pub fn ensure_status(&self, expected: LoanStatus, action: &'static str) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidState {
                entity: Self::ENTITY,
                id: self.id.as_uuid(),
                action,
                expected: expected.as_str(),
                actual: self.status.to_string(),
            });
        }
        Ok(())
    }
}

impl Record for Loan {
    const TABLE: Table = Table::Loans;
    const ENTITY: &'static str = "loan";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

/// Due dates for months `1..=duration_months` counted from `issued_at`.
/// The last entry is the maturity date.
pub fn charge_schedule(issued_at: NaiveDate, duration_months: u32) -> Result<Vec<NaiveDate>> {
    (1..=duration_months)
        .map(|month| {
            issued_at
                .checked_add_months(Months::new(month))
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "due date for month {} after {} is out of range",
                        month, issued_at
                    ))
                })
        })
        .collect()
}

/// Charge status as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanChargeStatus {
    /// Not yet paid
    Pending,
    /// Fully paid
    Paid,
    /// Past due, persisted by a sweep
    Overdue,
    /// Forgiven
    Waived,
}

impl LoanChargeStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanChargeStatus::Pending => "pending",
            LoanChargeStatus::Paid => "paid",
            LoanChargeStatus::Overdue => "overdue",
            LoanChargeStatus::Waived => "waived",
        }
    }
}

impl fmt::Display for LoanChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled month of a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanCharge {
    /// Charge id
    pub id: ChargeId,

    /// Owning loan
    pub loan_id: LoanId,

    /// 1-based month in the schedule
    pub month_number: u32,

    /// Amount due
    pub charge_amount: Money,

    /// Due date
    pub due_date: NaiveDate,

    /// Stored status
    pub status: LoanChargeStatus,

    /// Collected so far, never above `charge_amount`
    pub amount_paid: Money,

    /// Date the charge became fully paid
    pub paid_at: Option<NaiveDate>,

    /// Notes recorded when waived
    pub payment_notes: Option<String>,
}

impl LoanCharge {
    /// Pending charge
    pub fn new(loan_id: LoanId, month_number: u32, charge_amount: Money, due_date: NaiveDate) -> Self {
        Self {
            id: ChargeId::generate(),
            loan_id,
            month_number,
            charge_amount,
            due_date,
            status: LoanChargeStatus::Pending,
            amount_paid: Money::ZERO,
            paid_at: None,
            payment_notes: None,
        }
    }

    /// Amount still owed on this charge
    pub fn outstanding(&self) -> Money {
        self.charge_amount.saturating_sub(self.amount_paid)
    }

    /// Pending or overdue
    pub fn is_payable(&self) -> bool {
        matches!(
            self.status,
            LoanChargeStatus::Pending | LoanChargeStatus::Overdue
        )
    }

    /// Unpaid, unwaived, and due before `today`
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_payable() && self.outstanding().is_positive() && self.due_date < today
    }

    /// Whole days past due, zero when not overdue
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        if self.is_overdue(today) {
            (today - self.due_date).num_days()
        } else {
            0
        }
    }

    /// Status with overdue evaluated against `today`
    pub fn effective_status(&self, today: NaiveDate) -> LoanChargeStatus {
        if self.status == LoanChargeStatus::Pending && self.is_overdue(today) {
            LoanChargeStatus::Overdue
        } else {
            self.status
        }
    }
}

impl Record for LoanCharge {
    const TABLE: Table = Table::LoanCharges;
    const ENTITY: &'static str = "loan charge";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

/// Part of a charges payment applied to one charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeAllocation {
    /// Charge id
    pub charge_id: ChargeId,
    /// Month in the schedule
    pub month_number: u32,
    /// Amount applied
    pub applied: Money,
    /// Charge became fully paid
    pub settled: bool,
}

/// Apply `amount` to payable charges, lowest month first, partially filling
/// the last one touched. Returns what went where; any remainder that finds
/// no payable charge is left unapplied, so callers check the total first.
pub fn allocate_charges(
    charges: &mut [LoanCharge],
    amount: Money,
    today: NaiveDate,
) -> Vec<ChargeAllocation> {
    charges.sort_by_key(|charge| charge.month_number);

    let mut remaining = amount;
    let mut allocations = Vec::new();
    for charge in charges.iter_mut() {
        if !remaining.is_positive() {
            break;
        }
        if !charge.is_payable() {
            continue;
        }
        let owed = charge.outstanding();
        if !owed.is_positive() {
            continue;
        }
        let applied = remaining.min(owed);
        charge.amount_paid += applied;
        remaining -= applied;

        let settled = charge.amount_paid == charge.charge_amount;
        if settled {
            charge.status = LoanChargeStatus::Paid;
            charge.paid_at = Some(today);
        }
        allocations.push(ChargeAllocation {
            charge_id: charge.id,
            month_number: charge.month_number,
            applied,
            settled,
        });
    }
    allocations
}

/// Append-only record of one loan payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPayment {
    /// Payment id
    pub id: LoanPaymentId,

    /// Loan
    pub loan_id: LoanId,

    /// Borrower
    pub member_id: MemberId,

    /// Group
    pub group_id: GroupId,

    /// Principal portion
    pub principal_paid: Money,

    /// Charges portion
    pub charges_paid: Money,

    /// `principal_paid + charges_paid`
    pub total_paid: Money,

    /// Payment method label
    pub payment_method: String,

    /// Notes
    pub notes: Option<String>,

    /// Date paid
    pub payment_date: NaiveDate,

    /// Who recorded it
    pub recorded_by: Option<ActorId>,

    /// Insert time
    pub created_at: DateTime<Utc>,
}

impl Record for LoanPayment {
    const TABLE: Table = Table::LoanPayments;
    const ENTITY: &'static str = "loan payment";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}
