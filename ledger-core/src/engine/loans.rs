//! Loan engine
//!
//! # State machine
//!
//! | From       | Operation            | To          |
//! |------------|----------------------|-------------|
//! | -          | `create_loan`        | `pending`   |
//! | `pending`  | `approve_loan`       | `approved`  |
//! | `approved` | `disburse_loan`      | `active`    |
//! | `active`   | `record_payment`     | `active` / `completed` |
//! | `active`   | `default_loan`       | `defaulted` |
//!
//! Anything else is `InvalidState`.

use crate::{
    error::{Error, PaymentComponent, Result},
    model::{
        allocate_charges, charge_schedule, validate_method, ChargeAllocation, GroupMember, Loan,
        LoanCharge, LoanChargeStatus, LoanPayment, LoanStatus, Transaction, TransactionType,
    },
    money::Money,
    storage::{Index, Reader, Record, UnitOfWork},
    types::{ActorId, ChargeId, GroupId, LoanId, LoanPaymentId, MemberId, Reference},
    Ledger,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Input to [`LoanEngine::record_payment`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPaymentRequest {
    /// Principal portion
    pub principal_paid: Money,
    /// Charges portion
    pub charges_paid: Money,
    /// Payment method label
    pub method: String,
    /// Notes
    pub notes: Option<String>,
    /// Who recorded the payment
    pub recorded_by: Option<ActorId>,
}

impl LoanPaymentRequest {
    /// Payment with both portions
    pub fn new(principal_paid: Money, charges_paid: Money, method: impl Into<String>) -> Self {
        Self {
            principal_paid,
            charges_paid,
            method: method.into(),
            notes: None,
            recorded_by: None,
        }
    }

    /// Attach notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Attach the recording actor
    pub fn recorded_by(mut self, actor: ActorId) -> Self {
        self.recorded_by = Some(actor);
        self
    }
}

/// Everything a loan payment touched
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    /// Loan after the payment
    pub loan: Loan,
    /// Payment row
    pub payment: LoanPayment,
    /// Charges portion, per charge
    pub allocations: Vec<ChargeAllocation>,
    /// `loan_payment` transaction
    pub transaction: Transaction,
}

/// Read projection of a loan and its schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSummary {
    /// Loan
    pub loan_id: LoanId,
    /// Status
    pub status: LoanStatus,
    /// Principal lent
    pub principal_amount: Money,
    /// Principal still owed
    pub remaining_balance: Money,
    /// Principal repaid
    pub total_principal_paid: Money,
    /// Charges collected
    pub total_charged: Money,
    /// Unpaid amount on payable charges
    pub outstanding_charges: Money,
    /// Fully paid charges
    pub months_paid: u32,
    /// Schedule length
    pub duration_months: u32,
    /// Earliest due date among payable charges
    pub next_due_date: Option<NaiveDate>,
    /// Any charge overdue as of today
    pub is_overdue: bool,
    /// Number of overdue charges as of today
    pub overdue_charges: usize,
    /// Principal repaid, percent
    pub payment_progress: Decimal,
    /// Principal plus all scheduled charges
    pub total_loan_cost: Money,
    /// Maturity date
    pub maturity_date: Option<NaiveDate>,
}

/// Result of an overdue sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueSweep {
    /// Active loans inspected
    pub loans_checked: usize,
    /// Charges flipped from pending to overdue
    pub charges_marked: usize,
    /// Loans with at least one newly overdue charge
    pub loans_affected: Vec<LoanId>,
}

/// Loan operations
#[derive(Debug, Clone, Copy)]
pub struct LoanEngine<'a> {
    ledger: &'a Ledger,
}

impl<'a> LoanEngine<'a> {
    pub(crate) fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Request a loan; nothing moves until disbursement
    pub fn create_loan(
        &self,
        member_id: MemberId,
        principal: Money,
        monthly_charge: Money,
        duration_months: u32,
        notes: Option<String>,
    ) -> Result<Loan> {
        super::require_positive("principal", principal)?;
        if monthly_charge.is_negative() {
            return Err(Error::invalid_amount(
                "monthly_charge",
                monthly_charge,
                "must not be negative",
            ));
        }
        let limits = &self.ledger.config().loans;
        if duration_months == 0 || duration_months > limits.max_duration_months {
            return Err(Error::invalid_amount(
                "duration_months",
                duration_months,
                "outside the allowed range",
            ));
        }
        if let Some(max) = limits.max_principal {
            if principal > max {
                return Err(Error::invalid_amount(
                    "principal",
                    principal,
                    "above the configured maximum",
                ));
            }
        }

        super::require_within_max("monthly_charge", monthly_charge)?;

        let mut uow = self.ledger.storage().begin();
        let member = super::load_active_member(&uow, member_id, "lend to")?;
        let loan = Loan::new(
            member.group_id,
            member_id,
            principal,
            monthly_charge,
            duration_months,
            notes,
            self.ledger.now(),
        );
        loan.total_loan_cost()?;
        uow.put(&loan)?;
        uow.link(Index::MemberLoans, member_id.as_uuid(), loan.id.as_uuid());
        uow.link(Index::GroupLoans, member.group_id.as_uuid(), loan.id.as_uuid());
        uow.commit()?;

        self.ledger.metrics().record_loan("created");
        tracing::info!(
            loan_id = %loan.id,
            member_id = %member_id,
            principal = %principal,
            monthly_charge = %monthly_charge,
            duration_months,
            "Loan requested"
        );
        Ok(loan)
    }

    /// pending → approved
    pub fn approve_loan(&self, loan_id: LoanId) -> Result<Loan> {
        let mut uow = self.ledger.storage().begin();
        let mut loan: Loan = uow.fetch(loan_id.as_uuid())?;
        loan.ensure_status(LoanStatus::Pending, "approve")?;

        let now = self.ledger.now();
        loan.status = LoanStatus::Approved;
        loan.approved_at = Some(now);
        loan.updated_at = now;
        uow.put(&loan)?;
        uow.commit()?;

        self.ledger.metrics().record_loan("approved");
        tracing::info!(loan_id = %loan_id, "Loan approved");
        Ok(loan)
    }

    /// approved → active: schedule charges, move principal, log it
    pub fn disburse_loan(&self, loan_id: LoanId, disbursed_by: Option<ActorId>) -> Result<Loan> {
        let mut uow = self.ledger.storage().begin();
        let mut loan: Loan = uow.fetch(loan_id.as_uuid())?;
        loan.ensure_status(LoanStatus::Approved, "disburse")?;
        let mut member = super::load_current_member(&uow, loan.member_id, "disburse to")?;

        let now = self.ledger.now();
        let issued_at = now.date_naive();
        let schedule = charge_schedule(issued_at, loan.duration_months)?;

        for (index, due_date) in schedule.iter().enumerate() {
            let charge = LoanCharge::new(loan.id, index as u32 + 1, loan.monthly_charge, *due_date);
            uow.put(&charge)?;
            uow.link(Index::LoanCharges, loan.id.as_uuid(), charge.id.as_uuid());
        }

        loan.status = LoanStatus::Active;
        loan.issued_at = Some(issued_at);
        loan.maturity_date = schedule.last().copied();
        loan.updated_at = now;
        uow.put(&loan)?;

        member.totals.total_borrowed =
            member.totals.total_borrowed.checked_add(loan.principal_amount)?;
        member.totals.outstanding_loans =
            member.totals.outstanding_loans.checked_add(loan.principal_amount)?;
        member.updated_at = now;
        uow.put(&member)?;

        let txn = Transaction::record(
            loan.group_id,
            loan.member_id,
            TransactionType::LoanDisburse,
            loan.principal_amount,
            loan.remaining_balance,
            "Loan disbursement",
            Reference::Loan(loan.id),
            disbursed_by,
            now,
        );
        super::post_transaction(&mut uow, &txn)?;
        uow.commit()?;

        self.ledger.metrics().record_loan("disbursed");
        tracing::info!(
            loan_id = %loan_id,
            member_id = %loan.member_id,
            principal = %loan.principal_amount,
            charges = schedule.len(),
            maturity_date = ?loan.maturity_date,
            "Loan disbursed"
        );
        Ok(loan)
    }

    /// Apply a repayment to an active loan
    ///
    /// The charges portion fills payable charges in month order; the
    /// principal portion reduces the remaining balance and completes the
    /// loan when it reaches zero.
    pub fn record_payment(
        &self,
        loan_id: LoanId,
        request: LoanPaymentRequest,
    ) -> Result<PaymentReceipt> {
        let LoanPaymentRequest {
            principal_paid,
            charges_paid,
            method,
            notes,
            recorded_by,
        } = request;

        if principal_paid.is_negative() {
            return Err(Error::invalid_amount(
                "principal_paid",
                principal_paid,
                "must not be negative",
            ));
        }
        if charges_paid.is_negative() {
            return Err(Error::invalid_amount(
                "charges_paid",
                charges_paid,
                "must not be negative",
            ));
        }
        let total_paid = principal_paid.checked_add(charges_paid)?;
        if !total_paid.is_positive() {
            return Err(Error::invalid_amount(
                "payment",
                total_paid,
                "principal or charges must be positive",
            ));
        }
        validate_method(&method)?;

        let mut uow = self.ledger.storage().begin();
        let mut loan: Loan = uow.fetch(loan_id.as_uuid())?;
        loan.ensure_status(LoanStatus::Active, "record payment on")?;

        if principal_paid > loan.remaining_balance {
            self.reject_overpayment(
                &loan,
                PaymentComponent::Principal,
                principal_paid,
                loan.remaining_balance,
            );
            return Err(Error::Overpayment {
                loan_id: loan_id.as_uuid(),
                component: PaymentComponent::Principal,
                attempted: principal_paid,
                outstanding: loan.remaining_balance,
            });
        }

        let mut charges: Vec<LoanCharge> = uow.children(Index::LoanCharges, loan_id.as_uuid())?;
        let payable: Money = charges
            .iter()
            .filter(|c| c.is_payable())
            .map(LoanCharge::outstanding)
            .sum();
        if charges_paid > payable {
            self.reject_overpayment(&loan, PaymentComponent::Charges, charges_paid, payable);
            return Err(Error::Overpayment {
                loan_id: loan_id.as_uuid(),
                component: PaymentComponent::Charges,
                attempted: charges_paid,
                outstanding: payable,
            });
        }

        let now = self.ledger.now();
        let today = now.date_naive();

        let allocations = allocate_charges(&mut charges, charges_paid, today);
        for allocation in &allocations {
            if let Some(charge) = charges.iter().find(|c| c.id == allocation.charge_id) {
                uow.put(charge)?;
            }
            tracing::debug!(
                loan_id = %loan_id,
                month = allocation.month_number,
                applied = %allocation.applied,
                settled = allocation.settled,
                "Charge payment allocated"
            );
        }

        loan.remaining_balance = loan.remaining_balance.checked_sub(principal_paid)?;
        loan.total_principal_paid = loan.total_principal_paid.checked_add(principal_paid)?;
        loan.total_charged = loan.total_charged.checked_add(charges_paid)?;
        loan.months_paid = charges
            .iter()
            .filter(|c| c.status == LoanChargeStatus::Paid)
            .count() as u32;
        loan.updated_at = now;
        let completed = loan.remaining_balance.is_zero();
        if completed {
            loan.status = LoanStatus::Completed;
            loan.paid_off_at = Some(today);
        }
        uow.put(&loan)?;

        if principal_paid.is_positive() {
            let mut member: GroupMember = uow.fetch(loan.member_id.as_uuid())?;
            member.totals.total_repaid = member.totals.total_repaid.checked_add(principal_paid)?;
            member.totals.outstanding_loans =
                member.totals.outstanding_loans.checked_sub(principal_paid)?;
            member.updated_at = now;
            uow.put(&member)?;
        }

        let payment = LoanPayment {
            id: LoanPaymentId::generate(),
            loan_id,
            member_id: loan.member_id,
            group_id: loan.group_id,
            principal_paid,
            charges_paid,
            total_paid,
            payment_method: method,
            notes,
            payment_date: today,
            recorded_by: recorded_by.clone(),
            created_at: now,
        };
        uow.put(&payment)?;
        uow.link(Index::LoanPayments, loan_id.as_uuid(), payment.id.as_uuid());

        let txn = Transaction::record(
            loan.group_id,
            loan.member_id,
            TransactionType::LoanPayment,
            total_paid,
            loan.remaining_balance,
            "Loan repayment",
            Reference::Loan(loan_id),
            recorded_by,
            now,
        );
        super::post_transaction(&mut uow, &txn)?;
        uow.commit()?;

        self.ledger.metrics().record_loan_payment();
        if completed {
            self.ledger.metrics().record_loan("completed");
        }
        tracing::info!(
            loan_id = %loan_id,
            principal_paid = %principal_paid,
            charges_paid = %charges_paid,
            remaining_balance = %loan.remaining_balance,
            months_paid = loan.months_paid,
            completed,
            "Loan payment recorded"
        );

        Ok(PaymentReceipt {
            loan,
            payment,
            allocations,
            transaction: txn,
        })
    }

    fn reject_overpayment(
        &self,
        loan: &Loan,
        component: PaymentComponent,
        attempted: Money,
        outstanding: Money,
    ) {
        tracing::warn!(
            loan_id = %loan.id,
            component = %component,
            attempted = %attempted,
            outstanding = %outstanding,
            "Loan overpayment rejected"
        );
    }

    /// active → defaulted; the balance stays on the loan but leaves the
    /// member's outstanding total
    pub fn default_loan(&self, loan_id: LoanId, reason: impl Into<String>) -> Result<Loan> {
        let reason = reason.into();
        let mut uow = self.ledger.storage().begin();
        let mut loan: Loan = uow.fetch(loan_id.as_uuid())?;
        loan.ensure_status(LoanStatus::Active, "default")?;

        let now = self.ledger.now();
        loan.status = LoanStatus::Defaulted;
        loan.defaulted_at = Some(now);
        loan.default_reason = Some(reason.clone());
        loan.updated_at = now;
        uow.put(&loan)?;

        let mut member: GroupMember = uow.fetch(loan.member_id.as_uuid())?;
        member.totals.outstanding_loans =
            member.totals.outstanding_loans.checked_sub(loan.remaining_balance)?;
        member.updated_at = now;
        uow.put(&member)?;
        uow.commit()?;

        self.ledger.metrics().record_loan("defaulted");
        tracing::warn!(
            loan_id = %loan_id,
            member_id = %loan.member_id,
            remaining_balance = %loan.remaining_balance,
            reason = %reason,
            "Loan defaulted"
        );
        Ok(loan)
    }

    /// Forgive a payable charge on an active loan
    pub fn waive_charge(&self, charge_id: ChargeId, notes: Option<String>) -> Result<LoanCharge> {
        let mut uow = self.ledger.storage().begin();
        let mut charge: LoanCharge = uow.fetch(charge_id.as_uuid())?;
        let loan: Loan = uow.fetch(charge.loan_id.as_uuid())?;
        loan.ensure_status(LoanStatus::Active, "waive charge on")?;
        if !charge.is_payable() {
            return Err(Error::InvalidState {
                entity: LoanCharge::ENTITY,
                id: charge_id.as_uuid(),
                action: "waive",
                expected: "pending or overdue",
                actual: charge.status.to_string(),
            });
        }
        charge.status = LoanChargeStatus::Waived;
        charge.payment_notes = notes;
        uow.put(&charge)?;
        uow.commit()?;

        tracing::info!(
            loan_id = %charge.loan_id,
            charge_id = %charge_id,
            month = charge.month_number,
            "Loan charge waived"
        );
        Ok(charge)
    }

    /// Persist pending → overdue for one loan's charges as of today
    pub fn mark_overdue_charges(&self, loan_id: LoanId) -> Result<usize> {
        let today = self.ledger.today();
        let mut uow = self.ledger.storage().begin();
        let loan: Loan = uow.fetch(loan_id.as_uuid())?;
        let marked = mark_overdue(&mut uow, &loan, today)?;
        uow.commit()?;
        if marked > 0 {
            self.ledger.metrics().record_charges_overdue(marked);
            tracing::info!(loan_id = %loan_id, marked, "Charges marked overdue");
        }
        Ok(marked)
    }

    /// Persist overdue transitions across every active loan in one unit
    pub fn sweep_overdue(&self) -> Result<OverdueSweep> {
        let today = self.ledger.today();
        let mut uow = self.ledger.storage().begin();
        let loans: Vec<Loan> = uow.scan()?;

        let mut sweep = OverdueSweep::default();
        for loan in loans.iter().filter(|l| l.is_active()) {
            sweep.loans_checked += 1;
            let marked = mark_overdue(&mut uow, loan, today)?;
            if marked > 0 {
                sweep.charges_marked += marked;
                sweep.loans_affected.push(loan.id);
            }
        }
        uow.commit()?;

        self.ledger.metrics().record_charges_overdue(sweep.charges_marked);
        tracing::info!(
            loans_checked = sweep.loans_checked,
            charges_marked = sweep.charges_marked,
            loans_affected = sweep.loans_affected.len(),
            "Overdue sweep finished"
        );
        Ok(sweep)
    }

    /// Load a loan
    pub fn get(&self, loan_id: LoanId) -> Result<Loan> {
        self.ledger.storage().fetch(loan_id.as_uuid())
    }

    /// Charge schedule in month order
    pub fn charges(&self, loan_id: LoanId) -> Result<Vec<LoanCharge>> {
        let mut charges: Vec<LoanCharge> = self
            .ledger
            .storage()
            .children(Index::LoanCharges, loan_id.as_uuid())?;
        charges.sort_by_key(|c| c.month_number);
        Ok(charges)
    }

    /// Payments, oldest first
    pub fn payments(&self, loan_id: LoanId) -> Result<Vec<LoanPayment>> {
        let mut payments: Vec<LoanPayment> = self
            .ledger
            .storage()
            .children(Index::LoanPayments, loan_id.as_uuid())?;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    /// Loans of one member
    pub fn member_loans(&self, member_id: MemberId) -> Result<Vec<Loan>> {
        self.ledger
            .storage()
            .children(Index::MemberLoans, member_id.as_uuid())
    }

    /// Loans of one group
    pub fn group_loans(&self, group_id: GroupId) -> Result<Vec<Loan>> {
        self.ledger
            .storage()
            .children(Index::GroupLoans, group_id.as_uuid())
    }

    /// Every active loan
    pub fn active_loans(&self) -> Result<Vec<Loan>> {
        let loans: Vec<Loan> = self.ledger.storage().scan()?;
        Ok(loans.into_iter().filter(Loan::is_active).collect())
    }

    /// Unpaid amount on payable charges
    pub fn outstanding_charges(&self, loan_id: LoanId) -> Result<Money> {
        Ok(self
            .charges(loan_id)?
            .iter()
            .filter(|c| c.is_payable())
            .map(LoanCharge::outstanding)
            .sum())
    }

    /// Earliest due date among payable charges
    pub fn next_due_date(&self, loan_id: LoanId) -> Result<Option<NaiveDate>> {
        Ok(self
            .charges(loan_id)?
            .iter()
            .filter(|c| c.is_payable())
            .map(|c| c.due_date)
            .min())
    }

    /// Any charge overdue as of today
    pub fn is_overdue(&self, loan_id: LoanId) -> Result<bool> {
        let today = self.ledger.today();
        Ok(self.charges(loan_id)?.iter().any(|c| c.is_overdue(today)))
    }

    /// Loan and schedule projection
    pub fn loan_summary(&self, loan_id: LoanId) -> Result<LoanSummary> {
        let loan = self.get(loan_id)?;
        let charges = self.charges(loan_id)?;
        let today = self.ledger.today();

        let payable = charges.iter().filter(|c| c.is_payable());
        let overdue_charges = charges.iter().filter(|c| c.is_overdue(today)).count();

        Ok(LoanSummary {
            loan_id,
            status: loan.status,
            principal_amount: loan.principal_amount,
            remaining_balance: loan.remaining_balance,
            total_principal_paid: loan.total_principal_paid,
            total_charged: loan.total_charged,
            outstanding_charges: payable.clone().map(LoanCharge::outstanding).sum(),
            months_paid: loan.months_paid,
            duration_months: loan.duration_months,
            next_due_date: payable.map(|c| c.due_date).min(),
            is_overdue: overdue_charges > 0,
            overdue_charges,
            payment_progress: loan.payment_progress(),
            total_loan_cost: loan.total_loan_cost()?,
            maturity_date: loan.maturity_date,
        })
    }
}

fn mark_overdue(uow: &mut UnitOfWork<'_>, loan: &Loan, today: NaiveDate) -> Result<usize> {
    let charges: Vec<LoanCharge> = uow.children(Index::LoanCharges, loan.id.as_uuid())?;
    let mut marked = 0;
    for mut charge in charges {
        if charge.status == LoanChargeStatus::Pending && charge.is_overdue(today) {
            charge.status = LoanChargeStatus::Overdue;
            uow.put(&charge)?;
            marked += 1;
        }
    }
    Ok(marked)
}
