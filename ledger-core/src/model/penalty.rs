//! Penalties and their waiver state machine

use crate::{
    error::{Error, Result},
    money::Money,
    storage::{Record, Table},
    types::{ActorId, GroupId, LoanId, MemberId, PenaltyId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Penalty category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PenaltyType {
    /// Missed a loan charge due date
    LatePayment,
    /// Broke a group rule
    Violation,
    /// Loan default
    Default,
    /// Anything else
    Other,
}

impl PenaltyType {
    /// Human label
    pub fn label(&self) -> &'static str {
        match self {
            PenaltyType::LatePayment => "Late Payment",
            PenaltyType::Violation => "Rule Violation",
            PenaltyType::Default => "Default",
            PenaltyType::Other => "Other",
        }
    }
}

impl fmt::Display for PenaltyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PenaltyType::LatePayment => write!(f, "late_payment"),
            PenaltyType::Violation => write!(f, "violation"),
            PenaltyType::Default => write!(f, "default"),
            PenaltyType::Other => write!(f, "other"),
        }
    }
}

/// Penalty charged to a member, optionally tied to a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    /// Penalty id
    pub id: PenaltyId,

    /// Group
    pub group_id: GroupId,

    /// Penalized member
    pub member_id: MemberId,

    /// Loan the penalty relates to
    pub loan_id: Option<LoanId>,

    /// Category
    pub penalty_type: PenaltyType,

    /// Amount
    pub amount: Money,

    /// Reason
    pub reason: String,

    /// Application time
    pub applied_at: DateTime<Utc>,

    /// Waived flag
    pub waived: bool,

    /// Why it was waived
    pub waived_reason: Option<String>,

    /// When it was waived
    pub waived_at: Option<DateTime<Utc>>,

    /// Who waived it
    pub waived_by: Option<ActorId>,
}

impl Penalty {
    /// Amount that still counts against the member
    pub fn effective_amount(&self) -> Money {
        if self.waived {
            Money::ZERO
        } else {
            self.amount
        }
    }

    /// Not waived
    pub fn is_active(&self) -> bool {
        !self.waived
    }

    /// Mark waived; fails if already waived
    pub fn waive(&mut self, reason: String, actor: ActorId, now: DateTime<Utc>) -> Result<()> {
        if self.waived {
            return Err(Error::AlreadyWaived(self.id.as_uuid()));
        }
        self.waived = true;
        self.waived_reason = Some(reason);
        self.waived_at = Some(now);
        self.waived_by = Some(actor);
        Ok(())
    }

    /// Undo a waiver; fails if the penalty is active
    pub fn reverse_waiver(&mut self) -> Result<()> {
        if !self.waived {
            return Err(Error::NotWaived(self.id.as_uuid()));
        }
        self.waived = false;
        self.waived_reason = None;
        self.waived_at = None;
        self.waived_by = None;
        Ok(())
    }
}

impl Record for Penalty {
    const TABLE: Table = Table::Penalties;
    const ENTITY: &'static str = "penalty";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}
