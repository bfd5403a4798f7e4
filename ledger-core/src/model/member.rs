//! Group membership and its cached aggregates

use crate::{
    money::Money,
    storage::{Record, Table},
    types::{GroupId, MemberId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role within the group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    /// Group administrator
    Admin,
    /// Handles money on behalf of the group
    Treasurer,
    /// Ordinary member
    Member,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Admin => write!(f, "admin"),
            MemberRole::Treasurer => write!(f, "treasurer"),
            MemberRole::Member => write!(f, "member"),
        }
    }
}

/// Membership status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Participating
    Active,
    /// Not participating (also set on leave)
    Inactive,
    /// Temporarily barred
    Suspended,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberStatus::Active => write!(f, "active"),
            MemberStatus::Inactive => write!(f, "inactive"),
            MemberStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Money aggregates cached on a membership
///
/// Each field is a materialized view over ledger rows:
///
/// - `current_savings` = deposits + interest − withdrawals
/// - `total_contributed` = Σ deposits
/// - `total_withdrawn` = Σ withdrawals
/// - `total_borrowed` = Σ disbursed principal
/// - `total_repaid` = Σ principal repaid
/// - `outstanding_loans` = Σ remaining balance of active loans
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberTotals {
    /// Savings balance
    pub current_savings: Money,
    /// Lifetime deposits
    pub total_contributed: Money,
    /// Lifetime withdrawals
    pub total_withdrawn: Money,
    /// Lifetime disbursed principal
    pub total_borrowed: Money,
    /// Lifetime principal repaid
    pub total_repaid: Money,
    /// Principal still owed on active loans
    pub outstanding_loans: Money,
}

/// One aggregate whose cached value disagrees with the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotalsDrift {
    /// Field name
    pub field: &'static str,
    /// Cached value
    pub recorded: Money,
    /// Value derived from ledger rows
    pub derived: Money,
}

impl MemberTotals {
    /// Field-by-field comparison against `derived`
    pub fn drift(&self, derived: &MemberTotals) -> Vec<TotalsDrift> {
        let pairs = [
            ("current_savings", self.current_savings, derived.current_savings),
            ("total_contributed", self.total_contributed, derived.total_contributed),
            ("total_withdrawn", self.total_withdrawn, derived.total_withdrawn),
            ("total_borrowed", self.total_borrowed, derived.total_borrowed),
            ("total_repaid", self.total_repaid, derived.total_repaid),
            ("outstanding_loans", self.outstanding_loans, derived.outstanding_loans),
        ];
        pairs
            .into_iter()
            .filter(|(_, recorded, derived)| recorded != derived)
            .map(|(field, recorded, derived)| TotalsDrift {
                field,
                recorded,
                derived,
            })
            .collect()
    }
}

/// Membership of a user in a savings group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    /// Membership id
    pub id: MemberId,

    /// Group
    pub group_id: GroupId,

    /// User
    pub user_id: UserId,

    /// Role
    pub role: MemberRole,

    /// Status
    pub status: MemberStatus,

    /// Cached aggregates
    pub totals: MemberTotals,

    /// Join time
    pub joined_at: DateTime<Utc>,

    /// Set on removal; memberships are never hard-deleted
    pub left_at: Option<DateTime<Utc>>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl GroupMember {
    /// Fresh active membership with zero totals
    pub fn new(group_id: GroupId, user_id: UserId, role: MemberRole, now: DateTime<Utc>) -> Self {
        Self {
            id: MemberId::generate(),
            group_id,
            user_id,
            role,
            status: MemberStatus::Active,
            totals: MemberTotals::default(),
            joined_at: now,
            left_at: None,
            updated_at: now,
        }
    }

    /// Left the group
    pub fn has_left(&self) -> bool {
        self.left_at.is_some()
    }

    /// Active and still in the group
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active && !self.has_left()
    }

    /// Group administrator
    pub fn is_admin(&self) -> bool {
        self.role == MemberRole::Admin
    }

    /// Treasurer
    pub fn is_treasurer(&self) -> bool {
        self.role == MemberRole::Treasurer
    }
}

impl Record for GroupMember {
    const TABLE: Table = Table::Members;
    const ENTITY: &'static str = "group member";

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_member_is_active() {
        let member = GroupMember::new(
            GroupId::generate(),
            UserId::generate(),
            MemberRole::Treasurer,
            Utc::now(),
        );
        assert!(member.is_active());
        assert!(member.is_treasurer());
        assert!(!member.is_admin());
        assert_eq!(member.totals, MemberTotals::default());
    }

    #[test]
    fn test_left_member_is_not_active() {
        let mut member =
            GroupMember::new(GroupId::generate(), UserId::generate(), MemberRole::Member, Utc::now());
        member.left_at = Some(Utc::now());
        assert!(!member.is_active());
        assert_eq!(member.status, MemberStatus::Active);
    }

    #[test]
    fn test_drift_lists_only_mismatches() {
        let recorded = MemberTotals {
            current_savings: Money::from_major(100),
            total_contributed: Money::from_major(100),
            ..Default::default()
        };
        let derived = MemberTotals {
            current_savings: Money::from_major(90),
            total_contributed: Money::from_major(100),
            ..Default::default()
        };
        let drift = recorded.drift(&derived);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].field, "current_savings");
        assert_eq!(drift[0].derived, Money::from_major(90));
        assert!(derived.drift(&derived).is_empty());
    }
}
