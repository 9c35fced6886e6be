use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::directory::UserId;
use crate::domain::proposal::ProposalId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(format!("APR-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn status(self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }
}

/// Request/decision pair authorizing one exact discount value on one proposal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub proposal_id: ProposalId,
    pub discount_percent: Decimal,
    pub status: ApprovalStatus,
    pub requested_by: UserId,
    pub decided_by: Option<UserId>,
    pub comment: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    pub fn pending(
        proposal_id: ProposalId,
        discount_percent: Decimal,
        requested_by: UserId,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::generate(),
            proposal_id,
            discount_percent,
            status: ApprovalStatus::Pending,
            requested_by,
            decided_by: None,
            comment: None,
            requested_at,
            decided_at: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.status != ApprovalStatus::Pending
    }

    pub fn covers_discount(&self, discount_percent: Decimal, tolerance: Decimal) -> bool {
        self.discount_percent
            .checked_sub(discount_percent)
            .is_some_and(|delta| delta.abs() < tolerance)
    }

    /// `pending` moves exactly once to `approved` or `rejected`.
    pub fn decide(
        &mut self,
        decision: ApprovalDecision,
        decided_by: UserId,
        comment: Option<String>,
        decided_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.is_decided() {
            return Err(DomainError::ApprovalAlreadyDecided {
                id: self.id.clone(),
                status: self.status,
            });
        }

        self.status = decision.status();
        self.decided_by = Some(decided_by);
        self.comment = comment;
        self.decided_at = Some(decided_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{ApprovalDecision, ApprovalRecord, ApprovalStatus};
    use crate::domain::directory::UserId;
    use crate::domain::proposal::ProposalId;
    use crate::errors::DomainError;

    fn pending() -> ApprovalRecord {
        ApprovalRecord::pending(
            ProposalId("P-1".to_string()),
            Decimal::new(6, 0),
            UserId("u-rep".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn pending_record_decides_once() {
        let mut record = pending();
        record
            .decide(ApprovalDecision::Approved, UserId("u-mgr".to_string()), None, Utc::now())
            .expect("pending -> approved");
        assert_eq!(record.status, ApprovalStatus::Approved);
        assert_eq!(record.decided_by.as_ref().map(|id| id.0.as_str()), Some("u-mgr"));

        let error = record
            .decide(ApprovalDecision::Rejected, UserId("u-vp".to_string()), None, Utc::now())
            .expect_err("decided records never reopen");
        assert!(matches!(
            error,
            DomainError::ApprovalAlreadyDecided { status: ApprovalStatus::Approved, .. }
        ));
    }

    #[test]
    fn discount_match_uses_strict_tolerance() {
        let record = pending();
        let tolerance = Decimal::new(1, 2);
        assert!(record.covers_discount(Decimal::new(6001, 3), tolerance));
        assert!(!record.covers_discount(Decimal::new(601, 2), tolerance));
        assert!(!record.covers_discount(Decimal::new(65, 1), tolerance));
    }
}
