//! Single entry point for creating and mutating proposals.
//!
//! Every save goes through the same sequence: validate, merge, gate, audit,
//! persist. Gate denials never fail a save; they force the persisted status
//! back to `draft` and travel back to the caller as a warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::approvals::{ApprovalGate, ApprovalWorkflow, DiscountPolicy, GateDecision};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, RequestContext};
use crate::clock::Clock;
use crate::domain::directory::{ClientId, UserId};
use crate::domain::proposal::{
    LineItem, Proposal, ProposalId, ProposalStatus, ProposalTotals, DEFAULT_CURRENCY,
};
use crate::domain::revision::RevisionRecord;
use crate::errors::ApplicationError;
use crate::numbering::{with_revision_suffix, NumberAllocator, NumberResult, NumberingPolicy};
use crate::revisions::RevisionAuditor;
use crate::store::{
    ApprovalFilter, ApprovalStore, ClientDirectory, InMemoryApprovalStore, InMemoryDirectory,
    InMemoryProposalStore, InMemorySequenceStore, ProposalStore, SequenceStore, UserDirectory,
};

/// Ports the lifecycle is wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub proposals: Arc<dyn ProposalStore>,
    pub approvals: Arc<dyn ApprovalStore>,
    pub sequences: Arc<dyn SequenceStore>,
    pub clients: Arc<dyn ClientDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn in_memory(
        directory: Arc<InMemoryDirectory>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            proposals: Arc::new(InMemoryProposalStore::default()),
            approvals: Arc::new(InMemoryApprovalStore::default()),
            sequences: Arc::new(InMemorySequenceStore::default()),
            clients: directory.clone(),
            users: directory,
            audit,
            clock,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub policy: DiscountPolicy,
    pub numbering: NumberingPolicy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProposal {
    pub client_id: ClientId,
    #[serde(default)]
    pub responsible_user_id: Option<UserId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub discount_percent: Decimal,
    #[serde(default)]
    pub line_items: Vec<LineItemInput>,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub delivery_terms: Option<String>,
    #[serde(default)]
    pub validity_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub requested_status: Option<ProposalStatus>,
}

/// Partial update. Absent fields are left alone; nullable fields accept an
/// explicit `null` to clear them. An attribute set to `null` is removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub responsible_user_id: Option<Option<UserId>>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub discount_percent: Option<Decimal>,
    #[serde(default)]
    pub line_items: Option<Vec<LineItemInput>>,
    #[serde(default, deserialize_with = "nullable")]
    pub payment_terms: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub delivery_terms: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub validity_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ProposalChanges {
    fn validate(&self) -> Result<(), ApplicationError> {
        if let Some(discount_percent) = self.discount_percent {
            validate_discount(discount_percent)?;
        }
        if let Some(currency) = &self.currency {
            normalize_currency(Some(currency))?;
        }
        if let Some(line_items) = &self.line_items {
            price_line_items(line_items)?;
        }
        Ok(())
    }

    fn apply_to(self, proposal: &mut Proposal) -> Result<(), ApplicationError> {
        if let Some(title) = self.title {
            proposal.title = title.trim().to_string();
        }
        if let Some(responsible_user_id) = self.responsible_user_id {
            proposal.responsible_user_id = responsible_user_id;
        }
        if let Some(currency) = self.currency {
            proposal.currency = normalize_currency(Some(&currency))?;
        }
        if let Some(discount_percent) = self.discount_percent {
            proposal.discount_percent = discount_percent;
        }
        if let Some(line_items) = self.line_items {
            proposal.line_items = price_line_items(&line_items)?;
        }
        if let Some(payment_terms) = self.payment_terms {
            proposal.payment_terms = payment_terms;
        }
        if let Some(delivery_terms) = self.delivery_terms {
            proposal.delivery_terms = delivery_terms;
        }
        if let Some(validity_date) = self.validity_date {
            proposal.validity_date = validity_date;
        }
        if let Some(notes) = self.notes {
            proposal.notes = notes;
        }
        for (key, value) in self.attributes {
            if value.is_null() {
                proposal.attributes.remove(&key);
            } else {
                proposal.attributes.insert(key, value);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub proposal: Proposal,
    pub decision: GateDecision,
}

impl CreateOutcome {
    pub fn warning(&self) -> Option<&str> {
        self.decision.denial().map(|denial| denial.message.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub proposal: Proposal,
    pub revision: RevisionRecord,
    pub decision: GateDecision,
}

impl UpdateOutcome {
    pub fn warning(&self) -> Option<&str> {
        self.decision.denial().map(|denial| denial.message.as_str())
    }
}

pub struct ProposalLifecycle {
    proposals: Arc<dyn ProposalStore>,
    approvals: Arc<dyn ApprovalStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    allocator: NumberAllocator,
    auditor: RevisionAuditor,
    gate: ApprovalGate,
    workflow: ApprovalWorkflow,
}

impl ProposalLifecycle {
    pub fn new(collaborators: Collaborators, settings: LifecycleSettings) -> Self {
        let Collaborators { proposals, approvals, sequences, clients, users, audit, clock } =
            collaborators;

        let allocator =
            NumberAllocator::new(clients, users.clone(), sequences, clock.clone(), settings.numbering);
        let workflow = ApprovalWorkflow::new(
            proposals.clone(),
            approvals.clone(),
            users,
            audit.clone(),
            clock.clone(),
            settings.policy.clone(),
        );

        Self {
            proposals,
            approvals,
            audit,
            clock,
            allocator,
            auditor: RevisionAuditor::new(settings.policy.tolerance_pct),
            gate: ApprovalGate::new(settings.policy),
            workflow,
        }
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.workflow
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub async fn generate_number(
        &self,
        client_id: &ClientId,
        responsible_user_id: Option<&UserId>,
        revision_index: u32,
    ) -> Result<NumberResult, ApplicationError> {
        Ok(self.allocator.allocate(client_id, responsible_user_id, revision_index).await?)
    }

    pub async fn create(
        &self,
        input: NewProposal,
        context: &RequestContext,
    ) -> Result<CreateOutcome, ApplicationError> {
        if input.client_id.0.trim().is_empty() {
            return Err(ApplicationError::Validation("clientId is required".to_string()));
        }
        validate_discount(input.discount_percent)?;
        let line_items = price_line_items(&input.line_items)?;
        checked_totals(&line_items, input.discount_percent)?;
        let currency = normalize_currency(input.currency.as_deref())?;

        let allocation = self
            .allocator
            .allocate(&input.client_id, input.responsible_user_id.as_ref(), 0)
            .await?;

        let now = self.clock.now();
        let mut proposal = Proposal {
            id: ProposalId::generate(),
            number: allocation.number,
            client_id: input.client_id,
            responsible_user_id: input.responsible_user_id,
            status: ProposalStatus::Draft,
            discount_percent: input.discount_percent,
            revision: 0,
            line_items,
            title: input.title.trim().to_string(),
            currency,
            payment_terms: input.payment_terms,
            delivery_terms: input.delivery_terms,
            validity_date: input.validity_date,
            notes: input.notes,
            attributes: input.attributes.into_iter().filter(|(_, value)| !value.is_null()).collect(),
            created_by: context.actor.clone(),
            created_at: now,
            updated_at: now,
        };

        let requested_status = input.requested_status.unwrap_or(ProposalStatus::Draft);
        proposal.ensure_transition(requested_status)?;

        // A brand new proposal cannot have approval records yet.
        let decision = self.gate.check_transition(&proposal, requested_status, &[]);
        proposal.status = settle_status(&decision, requested_status);

        self.proposals.insert(&proposal).await?;

        self.emit_saved("proposal.created", &proposal, context, &decision, requested_status);
        Ok(CreateOutcome { proposal, decision })
    }

    pub async fn update(
        &self,
        id: &ProposalId,
        changes: ProposalChanges,
        requested_status: Option<ProposalStatus>,
        expected_revision: Option<u32>,
        context: &RequestContext,
    ) -> Result<UpdateOutcome, ApplicationError> {
        let current = self.get(id).await?;

        if let Some(expected) = expected_revision {
            if expected != current.revision {
                return Err(ApplicationError::Conflict(format!(
                    "proposal `{id}` is at revision {}, expected {expected}",
                    current.revision
                )));
            }
        }

        current.ensure_editable()?;
        changes.validate()?;

        let requested_status = requested_status.unwrap_or(current.status);
        current.ensure_transition(requested_status)?;

        let mut working = current.clone();
        changes.apply_to(&mut working)?;
        working
            .recompute_totals()
            .map_err(|error| ApplicationError::Validation(error.to_string()))?;
        checked_totals(&working.line_items, working.discount_percent)?;

        let approvals = self.approvals.list(&ApprovalFilter::for_proposal(id.clone())).await?;
        let decision = self.gate.check_transition(&working, requested_status, &approvals);
        working.status = settle_status(&decision, requested_status);

        let now = self.clock.now();
        working.revision = current.revision.saturating_add(1);
        working.number = with_revision_suffix(&current.number, working.revision);
        working.updated_at = now;

        let revision = self.auditor.record_revision(&current, &working, &context.actor, now);
        self.proposals.commit_revision(&working, current.revision, &revision).await?;

        self.emit_saved("proposal.updated", &working, context, &decision, requested_status);
        Ok(UpdateOutcome { proposal: working, revision, decision })
    }

    pub async fn get(&self, id: &ProposalId) -> Result<Proposal, ApplicationError> {
        self.proposals.find(id).await?.ok_or_else(|| ApplicationError::not_found("proposal", id))
    }

    pub async fn list_revisions(
        &self,
        id: &ProposalId,
    ) -> Result<Vec<RevisionRecord>, ApplicationError> {
        self.get(id).await?;
        Ok(self.proposals.list_revisions(id).await?)
    }

    fn emit_saved(
        &self,
        event_type: &str,
        proposal: &Proposal,
        context: &RequestContext,
        decision: &GateDecision,
        requested_status: ProposalStatus,
    ) {
        let outcome =
            if decision.is_allowed() { AuditOutcome::Success } else { AuditOutcome::Warning };
        self.audit.emit(
            AuditEvent::new(
                Some(proposal.id.clone()),
                context,
                event_type,
                AuditCategory::Lifecycle,
                outcome,
            )
            .with_metadata("number", proposal.number.clone())
            .with_metadata("revision", proposal.revision.to_string())
            .with_metadata("status", proposal.status.as_str()),
        );

        if let Some(denial) = decision.denial() {
            self.audit.emit(
                AuditEvent::new(
                    Some(proposal.id.clone()),
                    context,
                    "proposal.gate_denied",
                    AuditCategory::Approval,
                    AuditOutcome::Warning,
                )
                .with_metadata("requested_status", requested_status.as_str())
                .with_metadata("discount_percent", denial.discount_percent.normalize().to_string())
                .with_metadata("threshold_pct", denial.threshold_pct.normalize().to_string()),
            );
        }
    }
}

fn settle_status(decision: &GateDecision, requested_status: ProposalStatus) -> ProposalStatus {
    if decision.is_allowed() {
        requested_status
    } else {
        ProposalStatus::Draft
    }
}

pub(crate) fn validate_discount(discount_percent: Decimal) -> Result<(), ApplicationError> {
    if discount_percent < Decimal::ZERO || discount_percent > Decimal::ONE_HUNDRED {
        return Err(ApplicationError::Validation(format!(
            "discountPercent must be between 0 and 100, got {discount_percent}"
        )));
    }
    Ok(())
}

/// Validates the inputs and prices each line. Nothing is allocated or stored
/// before this succeeds.
fn price_line_items(line_items: &[LineItemInput]) -> Result<Vec<LineItem>, ApplicationError> {
    let mut priced = Vec::with_capacity(line_items.len());
    for (index, item) in line_items.iter().enumerate() {
        if item.description.trim().is_empty() {
            return Err(ApplicationError::Validation(format!(
                "lineItems[{index}].description is required"
            )));
        }
        if item.quantity < Decimal::ZERO || item.unit_price < Decimal::ZERO {
            return Err(ApplicationError::Validation(format!(
                "lineItems[{index}] quantity and unitPrice must not be negative"
            )));
        }
        let line = LineItem::new(item.description.trim(), item.quantity, item.unit_price)
            .map_err(|error| ApplicationError::Validation(format!("lineItems[{index}]: {error}")))?;
        priced.push(line);
    }
    Ok(priced)
}

fn checked_totals(
    line_items: &[LineItem],
    discount_percent: Decimal,
) -> Result<ProposalTotals, ApplicationError> {
    ProposalTotals::compute(line_items, discount_percent)
        .map_err(|error| ApplicationError::Validation(error.to_string()))
}

fn normalize_currency(raw: Option<&str>) -> Result<String, ApplicationError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_CURRENCY.to_string());
    };
    if raw.len() != 3 || !raw.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ApplicationError::Validation(format!(
            "currency `{raw}` is not a three-letter ISO code"
        )));
    }
    Ok(raw.to_ascii_uppercase())
}
