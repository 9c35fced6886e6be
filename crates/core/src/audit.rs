use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::directory::UserId;
use crate::domain::proposal::ProposalId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Numbering,
    Lifecycle,
    Approval,
    Persistence,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Warning,
    Rejected,
    Failed,
}

/// Who is acting and under which request. Passed explicitly into every core
/// operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor: UserId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(actor: UserId, correlation_id: impl Into<String>) -> Self {
        Self { actor, correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub proposal_id: Option<ProposalId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        proposal_id: Option<ProposalId>,
        context: &RequestContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            proposal_id,
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.0.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.event_type).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audit::{
            AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, RequestContext,
        },
        domain::{directory::UserId, proposal::ProposalId},
    };

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        let context = RequestContext::new(UserId("u-rep".to_owned()), "req-123");
        sink.emit(
            AuditEvent::new(
                Some(ProposalId("P-2026-0042".to_owned())),
                &context,
                "proposal.gate_denied",
                AuditCategory::Lifecycle,
                AuditOutcome::Warning,
            )
            .with_metadata("requested_status", "sent")
            .with_metadata("discount_percent", "10"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].actor, "u-rep");
        assert_eq!(events[0].proposal_id.as_ref().map(|id| id.0.as_str()), Some("P-2026-0042"));
        assert!(events[0].metadata.contains_key("requested_status"));
        assert_eq!(sink.event_types(), vec!["proposal.gate_denied".to_owned()]);
    }
}
