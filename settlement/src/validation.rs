//! Input and lifecycle checks for settlement operations
//!
//! Pure functions; the engine calls them before anything is staged.

use crate::{
    types::{IssueKind, PeriodStatus, Settlement, SettlementIssue, SettlementPeriod},
    Error, Result,
};
use chama_ledger::{storage::Record, Money};
use chrono::NaiveDate;

/// Longest accepted period name
pub const MAX_PERIOD_NAME_LEN: usize = 100;

/// Validate period inputs, returning the trimmed name
pub fn validate_period(
    name: &str,
    start: NaiveDate,
    end: NaiveDate,
    savings_target: Option<Money>,
) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(chama_ledger::Error::InvalidInput("period name is required".to_string()).into());
    }
    if name.chars().count() > MAX_PERIOD_NAME_LEN {
        return Err(chama_ledger::Error::InvalidInput(format!(
            "period name longer than {} characters",
            MAX_PERIOD_NAME_LEN
        ))
        .into());
    }
    if end <= start {
        return Err(Error::InvalidPeriod { start, end });
    }
    if let Some(target) = savings_target {
        if !target.is_positive() {
            return Err(Error::invalid_amount("savings_target", target, "must be positive"));
        }
        if target.exceeds_max() {
            return Err(Error::invalid_amount(
                "savings_target",
                target,
                "above the maximum amount",
            ));
        }
    }
    Ok(name.to_string())
}

/// `InvalidState` unless the period is in `expected`
pub fn ensure_period_status(
    period: &SettlementPeriod,
    expected: PeriodStatus,
    action: &'static str,
) -> Result<()> {
    if period.status != expected {
        return Err(Error::InvalidState {
            entity: SettlementPeriod::ENTITY,
            id: period.id.as_uuid(),
            action,
            expected: expected.as_str(),
            actual: period.status.to_string(),
        });
    }
    Ok(())
}

/// Check a payment against the settlement and its period
pub fn validate_payment(
    period: &SettlementPeriod,
    settlement: &Settlement,
    amount: Money,
) -> Result<()> {
    if !amount.is_positive() {
        return Err(Error::invalid_amount("amount", amount, "must be positive"));
    }
    if period.status == PeriodStatus::Finalized {
        return Err(Error::InvalidState {
            entity: SettlementPeriod::ENTITY,
            id: period.id.as_uuid(),
            action: "record payment in",
            expected: "active or closed",
            actual: period.status.to_string(),
        });
    }
    if amount > settlement.amount_pending {
        return Err(Error::ExceedsPending {
            settlement_id: settlement.id.as_uuid(),
            attempted: amount,
            pending: settlement.amount_pending,
        });
    }
    Ok(())
}

/// Problems a treasurer should look at before finalizing
pub fn period_issues<'a>(
    settlements: impl IntoIterator<Item = &'a Settlement>,
    today: NaiveDate,
) -> Vec<SettlementIssue> {
    let mut issues = Vec::new();
    for settlement in settlements {
        if settlement.total_due.is_positive() && settlement.amount_paid.is_zero() {
            issues.push(SettlementIssue {
                settlement_id: settlement.id,
                member_id: settlement.member_id,
                kind: IssueKind::NoPaymentRecorded,
                amount: settlement.total_due,
                days_overdue: None,
            });
        }
        if settlement.is_overdue(today) {
            issues.push(SettlementIssue {
                settlement_id: settlement.id,
                member_id: settlement.member_id,
                kind: IssueKind::Overdue,
                amount: settlement.amount_pending,
                days_overdue: settlement.days_overdue(today),
            });
        }
    }
    issues
}
