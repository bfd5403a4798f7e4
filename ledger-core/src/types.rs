//! Identifier types shared by every ledger entity
//!
//! Ids are UUIDv7 so that index scans come back roughly in creation order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh time-ordered id
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

entity_id!(
    /// Savings group
    GroupId
);
entity_id!(
    /// External user account (owned by the auth layer)
    UserId
);
entity_id!(
    /// Membership of a user in a group
    MemberId
);
entity_id!(
    /// Loan
    LoanId
);
entity_id!(
    /// Scheduled monthly loan charge
    ChargeId
);
entity_id!(
    /// Loan payment event
    LoanPaymentId
);
entity_id!(
    /// Savings account
    SavingsId
);
entity_id!(
    /// Ledger transaction
    TransactionId
);
entity_id!(
    /// Penalty
    PenaltyId
);
entity_id!(
    /// Settlement period
    PeriodId
);
entity_id!(
    /// Per-member settlement
    SettlementId
);
entity_id!(
    /// Settlement payment event
    SettlementPaymentId
);

/// Opaque identity of whoever performed an action, as supplied by the
/// auth layer. Recorded, never verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Create new actor ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity a ledger transaction originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reference {
    /// Loan disbursement or repayment
    Loan(LoanId),
    /// Savings movement
    Savings(SavingsId),
    /// Settlement payment
    Settlement(SettlementId),
}

impl Reference {
    /// Id of the referenced entity
    pub fn as_uuid(&self) -> Uuid {
        match self {
            Reference::Loan(id) => id.as_uuid(),
            Reference::Savings(id) => id.as_uuid(),
            Reference::Settlement(id) => id.as_uuid(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Loan(id) => write!(f, "loan:{}", id),
            Reference::Savings(id) => write!(f, "savings:{}", id),
            Reference::Settlement(id) => write!(f, "settlement:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_time_ordered() {
        let first = LoanId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = LoanId::generate();
        assert!(first < second);
    }

    #[test]
    fn test_reference_display() {
        let id = SavingsId::from_uuid(Uuid::nil());
        assert_eq!(
            Reference::Savings(id).to_string(),
            "savings:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Reference::Savings(id).as_uuid(), Uuid::nil());
    }
}
