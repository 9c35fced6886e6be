use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, RequestContext};
use crate::clock::Clock;
use crate::domain::approval::{ApprovalDecision, ApprovalId, ApprovalRecord, ApprovalStatus};
use crate::domain::proposal::ProposalId;
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::validate_discount;
use crate::store::{
    ApprovalFilter, ApprovalStore, DecisionWrite, ProposalStore, StoreError, UserDirectory,
};

use super::DiscountPolicy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub record: ApprovalRecord,
    /// `false` when the record already carried the requested decision.
    pub newly_decided: bool,
}

/// Request, decide and list approval records. Decisions are single-writer:
/// only the first decision on a pending record takes effect.
pub struct ApprovalWorkflow {
    proposals: Arc<dyn ProposalStore>,
    approvals: Arc<dyn ApprovalStore>,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: DiscountPolicy,
}

impl ApprovalWorkflow {
    pub fn new(
        proposals: Arc<dyn ProposalStore>,
        approvals: Arc<dyn ApprovalStore>,
        users: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        policy: DiscountPolicy,
    ) -> Self {
        Self { proposals, approvals, users, audit, clock, policy }
    }

    pub async fn request(
        &self,
        proposal_id: &ProposalId,
        discount_percent: Decimal,
        context: &RequestContext,
    ) -> Result<ApprovalRecord, ApplicationError> {
        validate_discount(discount_percent)?;

        if self.proposals.find(proposal_id).await?.is_none() {
            return Err(ApplicationError::not_found("proposal", proposal_id));
        }

        if let Some(existing) = self.pending_for(proposal_id, discount_percent).await? {
            return Ok(existing);
        }

        let record = ApprovalRecord::pending(
            proposal_id.clone(),
            discount_percent,
            context.actor.clone(),
            self.clock.now(),
        );
        match self.approvals.insert(&record).await {
            Ok(()) => {}
            // A concurrent request for the same value inserted first.
            Err(StoreError::Conflict(reason)) => {
                return self
                    .pending_for(proposal_id, discount_percent)
                    .await?
                    .ok_or(ApplicationError::Conflict(reason));
            }
            Err(error) => return Err(error.into()),
        }

        self.audit.emit(
            AuditEvent::new(
                Some(proposal_id.clone()),
                context,
                "approval.requested",
                AuditCategory::Approval,
                AuditOutcome::Success,
            )
            .with_metadata("approval_id", record.id.0.clone())
            .with_metadata("discount_percent", discount_percent.normalize().to_string()),
        );

        Ok(record)
    }

    async fn pending_for(
        &self,
        proposal_id: &ProposalId,
        discount_percent: Decimal,
    ) -> Result<Option<ApprovalRecord>, ApplicationError> {
        let pending = ApprovalFilter {
            proposal_id: Some(proposal_id.clone()),
            status: Some(ApprovalStatus::Pending),
        };
        Ok(self
            .approvals
            .list(&pending)
            .await?
            .into_iter()
            .find(|record| record.covers_discount(discount_percent, self.policy.tolerance_pct)))
    }

    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
        comment: Option<String>,
        context: &RequestContext,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let decider = self.users.find_user(&context.actor).await?;
        if !decider.as_ref().is_some_and(|user| user.may_approve_discounts) {
            return Err(ApplicationError::Forbidden(format!(
                "user `{}` may not decide discount approvals",
                context.actor
            )));
        }

        let current = self
            .approvals
            .find(approval_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("approval", approval_id))?;

        if current.is_decided() {
            return settled(current, decision);
        }

        let mut decided = current;
        decided.decide(decision, context.actor.clone(), comment, self.clock.now())?;

        match self.approvals.record_decision(&decided).await? {
            DecisionWrite::Applied => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(decided.proposal_id.clone()),
                        context,
                        "approval.decided",
                        AuditCategory::Approval,
                        AuditOutcome::Success,
                    )
                    .with_metadata("approval_id", decided.id.0.clone())
                    .with_metadata("decision", decided.status.as_str()),
                );
                Ok(DecisionOutcome { record: decided, newly_decided: true })
            }
            DecisionWrite::AlreadyDecided(winner) => settled(winner, decision),
            DecisionWrite::Missing => Err(ApplicationError::not_found("approval", approval_id)),
        }
    }

    pub async fn list(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<ApprovalRecord>, ApplicationError> {
        Ok(self.approvals.list(filter).await?)
    }
}

/// A record decided by someone else is confirmed when it matches the request
/// and reported as a conflict otherwise.
fn settled(
    record: ApprovalRecord,
    decision: ApprovalDecision,
) -> Result<DecisionOutcome, ApplicationError> {
    if record.status == decision.status() {
        return Ok(DecisionOutcome { record, newly_decided: false });
    }
    Err(DomainError::ApprovalAlreadyDecided { id: record.id, status: record.status }.into())
}
