//! Discount approval gate.
//!
//! A proposal whose discount exceeds the policy threshold may only leave
//! `draft` when an approved record exists for this proposal and this discount
//! value. The gate itself is pure; callers load the approval records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalRecord, ApprovalStatus};
use crate::domain::proposal::{Proposal, ProposalStatus};

pub mod workflow;

pub use workflow::{ApprovalWorkflow, DecisionOutcome};

pub fn default_threshold_pct() -> Decimal {
    Decimal::new(5, 0)
}

pub fn default_tolerance_pct() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountPolicy {
    pub threshold_pct: Decimal,
    pub tolerance_pct: Decimal,
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        Self { threshold_pct: default_threshold_pct(), tolerance_pct: default_tolerance_pct() }
    }
}

impl DiscountPolicy {
    pub fn requires_approval(&self, discount_percent: Decimal) -> bool {
        discount_percent > self.threshold_pct
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    DiscountApprovalRequired,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDenial {
    pub reason: DenialReason,
    pub requested_status: ProposalStatus,
    pub discount_percent: Decimal,
    pub threshold_pct: Decimal,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    Deny(GateDenial),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn denial(&self) -> Option<&GateDenial> {
        match self {
            Self::Allow => None,
            Self::Deny(denial) => Some(denial),
        }
    }

    fn deny_discount(
        requested_status: ProposalStatus,
        discount_percent: Decimal,
        threshold_pct: Decimal,
    ) -> Self {
        let message = format!(
            "discount {}% exceeds the {}% threshold; saved as draft until a matching approval is granted (requested {requested_status})",
            discount_percent.normalize(),
            threshold_pct.normalize(),
        );
        Self::Deny(GateDenial {
            reason: DenialReason::DiscountApprovalRequired,
            requested_status,
            discount_percent,
            threshold_pct,
            message,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApprovalGate {
    policy: DiscountPolicy,
}

impl ApprovalGate {
    pub fn new(policy: DiscountPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DiscountPolicy {
        &self.policy
    }

    pub fn check_transition(
        &self,
        proposal: &Proposal,
        requested_status: ProposalStatus,
        approvals: &[ApprovalRecord],
    ) -> GateDecision {
        if !self.policy.requires_approval(proposal.discount_percent)
            || requested_status == ProposalStatus::Draft
        {
            return GateDecision::Allow;
        }

        let approved = approvals.iter().any(|record| {
            record.proposal_id == proposal.id
                && record.status == ApprovalStatus::Approved
                && record.covers_discount(proposal.discount_percent, self.policy.tolerance_pct)
        });

        if approved {
            GateDecision::Allow
        } else {
            GateDecision::deny_discount(
                requested_status,
                proposal.discount_percent,
                self.policy.threshold_pct,
            )
        }
    }
}
