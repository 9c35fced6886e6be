use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::approval::{ApprovalId, ApprovalRecord, ApprovalStatus};
use crate::domain::directory::{ClientId, ClientProfile, UserId, UserProfile};
use crate::domain::proposal::{Proposal, ProposalId};
use crate::domain::revision::RevisionRecord;

use super::{
    ApprovalFilter, ApprovalStore, ClientDirectory, DecisionWrite, ProposalStore, SequenceKey,
    SequenceStore, StoreError, UserDirectory,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
pub struct InMemorySequenceStore {
    counters: Mutex<HashMap<SequenceKey, u32>>,
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn next_value(&self, key: &SequenceKey) -> Result<u32, StoreError> {
        let mut counters = lock(&self.counters);
        let counter = counters.entry(key.clone()).or_insert(0);
        *counter = counter
            .checked_add(1)
            .ok_or_else(|| StoreError::Backend(format!("sequence exhausted for {key:?}")))?;
        Ok(*counter)
    }
}

#[derive(Default)]
struct ProposalTables {
    proposals: HashMap<ProposalId, Proposal>,
    revisions: Vec<RevisionRecord>,
}

#[derive(Default)]
pub struct InMemoryProposalStore {
    tables: Mutex<ProposalTables>,
}

#[async_trait]
impl ProposalStore for InMemoryProposalStore {
    async fn find(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        Ok(lock(&self.tables).proposals.get(id).cloned())
    }

    async fn insert(&self, proposal: &Proposal) -> Result<(), StoreError> {
        let mut tables = lock(&self.tables);
        if tables.proposals.contains_key(&proposal.id) {
            return Err(StoreError::Conflict(format!("proposal `{}` already exists", proposal.id)));
        }
        if tables.proposals.values().any(|existing| existing.number == proposal.number) {
            return Err(StoreError::Conflict(format!(
                "proposal number `{}` is already taken",
                proposal.number
            )));
        }
        tables.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn commit_revision(
        &self,
        proposal: &Proposal,
        expected_revision: u32,
        revision: &RevisionRecord,
    ) -> Result<(), StoreError> {
        let mut tables = lock(&self.tables);
        let stored_revision = tables
            .proposals
            .get(&proposal.id)
            .map(|stored| stored.revision)
            .ok_or_else(|| StoreError::Conflict(format!("proposal `{}` vanished", proposal.id)))?;

        if stored_revision != expected_revision {
            return Err(StoreError::Conflict(format!(
                "proposal `{}` is at revision {stored_revision}, expected {expected_revision}",
                proposal.id
            )));
        }

        tables.proposals.insert(proposal.id.clone(), proposal.clone());
        tables.revisions.push(revision.clone());
        Ok(())
    }

    async fn list_revisions(&self, id: &ProposalId) -> Result<Vec<RevisionRecord>, StoreError> {
        let tables = lock(&self.tables);
        let mut revisions: Vec<RevisionRecord> =
            tables.revisions.iter().filter(|record| &record.proposal_id == id).cloned().collect();
        revisions.sort_by_key(|record| record.revision_number);
        Ok(revisions)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalStore {
    records: Mutex<Vec<ApprovalRecord>>,
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn find(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(lock(&self.records).iter().find(|record| &record.id == id).cloned())
    }

    async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        let mut records = lock(&self.records);
        if records.iter().any(|existing| existing.id == record.id) {
            return Err(StoreError::Conflict(format!("approval `{}` already exists", record.id)));
        }
        // At most one pending record per proposal and discount value.
        if record.status == ApprovalStatus::Pending
            && records.iter().any(|existing| {
                existing.status == ApprovalStatus::Pending
                    && existing.proposal_id == record.proposal_id
                    && existing.discount_percent == record.discount_percent
            })
        {
            return Err(StoreError::Conflict(format!(
                "a pending approval for {}% already exists on proposal `{}`",
                record.discount_percent.normalize(),
                record.proposal_id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRecord>, StoreError> {
        let records = lock(&self.records);
        let mut matching: Vec<ApprovalRecord> =
            records.iter().filter(|record| filter.matches(record)).cloned().collect();
        matching.sort_by(|left, right| {
            left.requested_at.cmp(&right.requested_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(matching)
    }

    async fn record_decision(
        &self,
        decided: &ApprovalRecord,
    ) -> Result<DecisionWrite, StoreError> {
        let mut records = lock(&self.records);
        let Some(stored) = records.iter_mut().find(|record| record.id == decided.id) else {
            return Ok(DecisionWrite::Missing);
        };

        if stored.is_decided() {
            return Ok(DecisionWrite::AlreadyDecided(stored.clone()));
        }

        *stored = decided.clone();
        Ok(DecisionWrite::Applied)
    }
}

/// Client and user directory backed by fixed maps.
#[derive(Default)]
pub struct InMemoryDirectory {
    clients: Mutex<HashMap<ClientId, ClientProfile>>,
    users: Mutex<HashMap<UserId, UserProfile>>,
}

impl InMemoryDirectory {
    pub fn with_client(self, client: ClientProfile) -> Self {
        lock(&self.clients).insert(client.id.clone(), client);
        self
    }

    pub fn with_user(self, user: UserProfile) -> Self {
        lock(&self.users).insert(user.id.clone(), user);
        self
    }
}

#[async_trait]
impl ClientDirectory for InMemoryDirectory {
    async fn find_client(&self, id: &ClientId) -> Result<Option<ClientProfile>, StoreError> {
        Ok(lock(&self.clients).get(id).cloned())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(lock(&self.users).get(id).cloned())
    }
}
