use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::directory::UserId;
use crate::domain::proposal::ProposalId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl RevisionId {
    pub fn generate() -> Self {
        Self(format!("REV-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub previous_value: Value,
    pub new_value: Value,
}

/// Append-only audit entry. Written once per persisted mutation, never edited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRecord {
    pub id: RevisionId,
    pub proposal_id: ProposalId,
    pub revision_number: u32,
    pub changed_by: UserId,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<FieldChange>,
}

impl RevisionRecord {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn change(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|change| change.field == field)
    }
}
