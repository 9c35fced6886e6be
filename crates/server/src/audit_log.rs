use propline_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes lifecycle audit events to the structured log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let proposal_id = event.proposal_id.as_ref().map_or("unknown", |id| id.0.as_str());
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                proposal_id = %proposal_id,
                actor = %event.actor,
                category = ?event.category,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Warning | AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                proposal_id = %proposal_id,
                actor = %event.actor,
                category = ?event.category,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
