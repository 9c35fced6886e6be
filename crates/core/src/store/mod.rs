//! Storage and directory ports consumed by the proposal core.
//!
//! Implementations live in `propline-db` (SQLite) and in [`memory`] for tests
//! and single-process embedding.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::{ApprovalId, ApprovalRecord, ApprovalStatus};
use crate::domain::directory::{ClientId, ClientProfile, UserId, UserProfile};
use crate::domain::proposal::{Proposal, ProposalId};
use crate::domain::revision::RevisionRecord;

pub mod memory;

pub use memory::{
    InMemoryApprovalStore, InMemoryDirectory, InMemoryProposalStore, InMemorySequenceStore,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Scope of one numbering sequence. Keyed on the rendered codes so that two
/// scopes can never print the same number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceKey {
    pub client_code: String,
    pub user_code: String,
    pub year: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApprovalFilter {
    pub proposal_id: Option<ProposalId>,
    pub status: Option<ApprovalStatus>,
}

impl ApprovalFilter {
    pub fn for_proposal(proposal_id: ProposalId) -> Self {
        Self { proposal_id: Some(proposal_id), status: None }
    }

    pub fn matches(&self, record: &ApprovalRecord) -> bool {
        self.proposal_id.as_ref().map_or(true, |id| &record.proposal_id == id)
            && self.status.map_or(true, |status| record.status == status)
    }
}

/// Result of a compare-and-set decision write.
#[derive(Clone, Debug, PartialEq)]
pub enum DecisionWrite {
    Applied,
    AlreadyDecided(ApprovalRecord),
    Missing,
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Atomically reserves and returns the next value for `key`, starting at 1.
    async fn next_value(&self, key: &SequenceKey) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn find(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError>;

    async fn insert(&self, proposal: &Proposal) -> Result<(), StoreError>;

    /// Writes `proposal` and appends `revision` as one unit, provided the stored
    /// revision still equals `expected_revision`. Fails with
    /// [`StoreError::Conflict`] otherwise and writes nothing.
    async fn commit_revision(
        &self,
        proposal: &Proposal,
        expected_revision: u32,
        revision: &RevisionRecord,
    ) -> Result<(), StoreError>;

    async fn list_revisions(&self, id: &ProposalId) -> Result<Vec<RevisionRecord>, StoreError>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn find(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError>;

    async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError>;

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRecord>, StoreError>;

    /// Persists a decided record only if the stored one is still pending.
    async fn record_decision(&self, decided: &ApprovalRecord)
        -> Result<DecisionWrite, StoreError>;
}

#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn find_client(&self, id: &ClientId) -> Result<Option<ClientProfile>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError>;
}
