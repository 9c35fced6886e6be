use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::Row;

use propline_core::domain::directory::{ClientId, UserId};
use propline_core::domain::proposal::{LineItem, Proposal, ProposalId, ProposalStatus};
use propline_core::domain::revision::{FieldChange, RevisionId, RevisionRecord};
use propline_core::store::{ProposalStore, StoreError};

use super::{
    decode_decimal, decode_error, decode_timestamp, encode_timestamp, RepositoryError,
};
use crate::DbPool;

const PROPOSAL_COLUMNS: &str = "id, number, client_id, responsible_user_id, status,
    discount_percent, revision, line_items_json, title, currency, payment_terms,
    delivery_terms, validity_date, notes, attributes_json, created_by, created_at, updated_at";

pub struct SqlProposalRepository {
    pool: DbPool,
}

impl SqlProposalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PROPOSAL_COLUMNS} FROM proposal WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_proposal).transpose()
    }

    pub async fn insert_proposal(&self, proposal: &Proposal) -> Result<(), RepositoryError> {
        let line_items_json = encode_json(&proposal.line_items)?;
        let attributes_json = encode_json(&proposal.attributes)?;

        sqlx::query(
            "INSERT INTO proposal (id, number, client_id, responsible_user_id, status,
                                   discount_percent, revision, line_items_json, title, currency,
                                   payment_terms, delivery_terms, validity_date, notes,
                                   attributes_json, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&proposal.id.0)
        .bind(&proposal.number)
        .bind(&proposal.client_id.0)
        .bind(proposal.responsible_user_id.as_ref().map(|id| id.0.as_str()))
        .bind(proposal.status.as_str())
        .bind(proposal.discount_percent.to_string())
        .bind(i64::from(proposal.revision))
        .bind(line_items_json)
        .bind(&proposal.title)
        .bind(&proposal.currency)
        .bind(&proposal.payment_terms)
        .bind(&proposal.delivery_terms)
        .bind(proposal.validity_date.map(|date| date.to_string()))
        .bind(&proposal.notes)
        .bind(attributes_json)
        .bind(&proposal.created_by.0)
        .bind(encode_timestamp(&proposal.created_at))
        .bind(encode_timestamp(&proposal.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns `false` without writing anything when the stored revision is no
    /// longer `expected_revision`.
    pub async fn save_revision(
        &self,
        proposal: &Proposal,
        expected_revision: u32,
        revision: &RevisionRecord,
    ) -> Result<bool, RepositoryError> {
        let line_items_json = encode_json(&proposal.line_items)?;
        let attributes_json = encode_json(&proposal.attributes)?;
        let changes_json = encode_json(&revision.changes)?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE proposal SET
                 number = ?, responsible_user_id = ?, status = ?, discount_percent = ?,
                 revision = ?, line_items_json = ?, title = ?, currency = ?, payment_terms = ?,
                 delivery_terms = ?, validity_date = ?, notes = ?, attributes_json = ?,
                 updated_at = ?
             WHERE id = ? AND revision = ?",
        )
        .bind(&proposal.number)
        .bind(proposal.responsible_user_id.as_ref().map(|id| id.0.as_str()))
        .bind(proposal.status.as_str())
        .bind(proposal.discount_percent.to_string())
        .bind(i64::from(proposal.revision))
        .bind(line_items_json)
        .bind(&proposal.title)
        .bind(&proposal.currency)
        .bind(&proposal.payment_terms)
        .bind(&proposal.delivery_terms)
        .bind(proposal.validity_date.map(|date| date.to_string()))
        .bind(&proposal.notes)
        .bind(attributes_json)
        .bind(encode_timestamp(&proposal.updated_at))
        .bind(&proposal.id.0)
        .bind(i64::from(expected_revision))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO proposal_revision (id, proposal_id, revision_number, changed_by,
                                            changed_at, changes_json)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&revision.id.0)
        .bind(&revision.proposal_id.0)
        .bind(i64::from(revision.revision_number))
        .bind(&revision.changed_by.0)
        .bind(encode_timestamp(&revision.timestamp))
        .bind(changes_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn revisions_for(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<RevisionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, proposal_id, revision_number, changed_by, changed_at, changes_json
             FROM proposal_revision WHERE proposal_id = ? ORDER BY revision_number ASC",
        )
        .bind(&proposal_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_revision).collect()
    }
}

#[async_trait]
impl ProposalStore for SqlProposalRepository {
    async fn find(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        Ok(self.find_by_id(id).await?)
    }

    async fn insert(&self, proposal: &Proposal) -> Result<(), StoreError> {
        Ok(self.insert_proposal(proposal).await?)
    }

    async fn commit_revision(
        &self,
        proposal: &Proposal,
        expected_revision: u32,
        revision: &RevisionRecord,
    ) -> Result<(), StoreError> {
        if self.save_revision(proposal, expected_revision, revision).await? {
            return Ok(());
        }
        Err(StoreError::Conflict(format!(
            "proposal `{}` moved past revision {expected_revision}",
            proposal.id
        )))
    }

    async fn list_revisions(&self, id: &ProposalId) -> Result<Vec<RevisionRecord>, StoreError> {
        Ok(self.revisions_for(id).await?)
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

fn row_to_proposal(row: &sqlx::sqlite::SqliteRow) -> Result<Proposal, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let number: String = row.try_get("number").map_err(decode_error)?;
    let client_id: String = row.try_get("client_id").map_err(decode_error)?;
    let responsible_user_id: Option<String> =
        row.try_get("responsible_user_id").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let discount_percent: String = row.try_get("discount_percent").map_err(decode_error)?;
    let revision: i64 = row.try_get("revision").map_err(decode_error)?;
    let line_items_json: String = row.try_get("line_items_json").map_err(decode_error)?;
    let title: String = row.try_get("title").map_err(decode_error)?;
    let currency: String = row.try_get("currency").map_err(decode_error)?;
    let payment_terms: Option<String> = row.try_get("payment_terms").map_err(decode_error)?;
    let delivery_terms: Option<String> = row.try_get("delivery_terms").map_err(decode_error)?;
    let validity_date: Option<String> = row.try_get("validity_date").map_err(decode_error)?;
    let notes: Option<String> = row.try_get("notes").map_err(decode_error)?;
    let attributes_json: String = row.try_get("attributes_json").map_err(decode_error)?;
    let created_by: String = row.try_get("created_by").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let status = ProposalStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown proposal status `{status}`")))?;
    let revision = u32::try_from(revision)
        .map_err(|_| RepositoryError::Decode(format!("revision out of range: {revision}")))?;
    let validity_date = validity_date
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|error| RepositoryError::Decode(format!("validity_date: {error}")))
        })
        .transpose()?;
    let line_items: Vec<LineItem> = decode_json("line_items_json", &line_items_json)?;
    let attributes: BTreeMap<String, Value> = decode_json("attributes_json", &attributes_json)?;

    Ok(Proposal {
        id: ProposalId(id),
        number,
        client_id: ClientId(client_id),
        responsible_user_id: responsible_user_id.map(UserId),
        status,
        discount_percent: decode_decimal("discount_percent", &discount_percent)?,
        revision,
        line_items,
        title,
        currency,
        payment_terms,
        delivery_terms,
        validity_date,
        notes,
        attributes,
        created_by: UserId(created_by),
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_revision(row: &sqlx::sqlite::SqliteRow) -> Result<RevisionRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let proposal_id: String = row.try_get("proposal_id").map_err(decode_error)?;
    let revision_number: i64 = row.try_get("revision_number").map_err(decode_error)?;
    let changed_by: String = row.try_get("changed_by").map_err(decode_error)?;
    let changed_at: String = row.try_get("changed_at").map_err(decode_error)?;
    let changes_json: String = row.try_get("changes_json").map_err(decode_error)?;

    let changes: Vec<FieldChange> = decode_json("changes_json", &changes_json)?;

    Ok(RevisionRecord {
        id: RevisionId(id),
        proposal_id: ProposalId(proposal_id),
        revision_number: u32::try_from(revision_number).map_err(|_| {
            RepositoryError::Decode(format!("revision_number out of range: {revision_number}"))
        })?,
        changed_by: UserId(changed_by),
        timestamp: decode_timestamp("changed_at", &changed_at)?,
        changes,
    })
}
