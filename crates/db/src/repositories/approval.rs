use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite};

use propline_core::domain::approval::{ApprovalId, ApprovalRecord, ApprovalStatus};
use propline_core::domain::directory::UserId;
use propline_core::domain::proposal::ProposalId;
use propline_core::store::{ApprovalFilter, ApprovalStore, DecisionWrite, StoreError};

use super::{decode_decimal, decode_error, decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

const APPROVAL_COLUMNS: &str = "id, proposal_id, discount_percent, status, requested_by,
    decided_by, comment, requested_at, decided_at";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approval_record WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    /// A second pending record for the same proposal and value violates
    /// `idx_approval_record_pending_value`.
    pub async fn insert_record(&self, record: &ApprovalRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_record (id, proposal_id, discount_percent, status, requested_by,
                                          decided_by, comment, requested_at, decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.proposal_id.0)
        .bind(record.discount_percent.normalize().to_string())
        .bind(record.status.as_str())
        .bind(&record.requested_by.0)
        .bind(record.decided_by.as_ref().map(|id| id.0.as_str()))
        .bind(&record.comment)
        .bind(encode_timestamp(&record.requested_at))
        .bind(record.decided_at.as_ref().map(encode_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_filtered(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {APPROVAL_COLUMNS} FROM approval_record WHERE 1 = 1"));
        if let Some(proposal_id) = &filter.proposal_id {
            query.push(" AND proposal_id = ").push_bind(proposal_id.0.clone());
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query.push(" ORDER BY requested_at ASC, id ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_approval).collect()
    }

    /// Conditional on the stored row still being pending; the first writer wins.
    pub async fn apply_decision(
        &self,
        decided: &ApprovalRecord,
    ) -> Result<DecisionWrite, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE approval_record
             SET status = ?, decided_by = ?, comment = ?, decided_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(decided.status.as_str())
        .bind(decided.decided_by.as_ref().map(|id| id.0.as_str()))
        .bind(&decided.comment)
        .bind(decided.decided_at.as_ref().map(encode_timestamp))
        .bind(&decided.id.0)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(DecisionWrite::Applied);
        }

        Ok(match self.find_by_id(&decided.id).await? {
            Some(current) => DecisionWrite::AlreadyDecided(current),
            None => DecisionWrite::Missing,
        })
    }
}

#[async_trait]
impl ApprovalStore for SqlApprovalRepository {
    async fn find(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(self.find_by_id(id).await?)
    }

    async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        Ok(self.insert_record(record).await?)
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self.list_filtered(filter).await?)
    }

    async fn record_decision(
        &self,
        decided: &ApprovalRecord,
    ) -> Result<DecisionWrite, StoreError> {
        Ok(self.apply_decision(decided).await?)
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let proposal_id: String = row.try_get("proposal_id").map_err(decode_error)?;
    let discount_percent: String = row.try_get("discount_percent").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let requested_by: String = row.try_get("requested_by").map_err(decode_error)?;
    let decided_by: Option<String> = row.try_get("decided_by").map_err(decode_error)?;
    let comment: Option<String> = row.try_get("comment").map_err(decode_error)?;
    let requested_at: String = row.try_get("requested_at").map_err(decode_error)?;
    let decided_at: Option<String> = row.try_get("decided_at").map_err(decode_error)?;

    let status = ApprovalStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status}`")))?;

    Ok(ApprovalRecord {
        id: ApprovalId(id),
        proposal_id: ProposalId(proposal_id),
        discount_percent: decode_decimal("discount_percent", &discount_percent)?,
        status,
        requested_by: UserId(requested_by),
        decided_by: decided_by.map(UserId),
        comment,
        requested_at: decode_timestamp("requested_at", &requested_at)?,
        decided_at: decided_at.map(|raw| decode_timestamp("decided_at", &raw)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use propline_core::domain::approval::{ApprovalDecision, ApprovalRecord, ApprovalStatus};
    use propline_core::domain::directory::{ClientId, UserId};
    use propline_core::domain::proposal::{Proposal, ProposalId, ProposalStatus};
    use propline_core::store::{
        ApprovalFilter, ApprovalStore, DecisionWrite, ProposalStore, StoreError,
    };

    use super::SqlApprovalRepository;
    use crate::repositories::SqlProposalRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn seed_proposal(pool: &DbPool, id: &str) -> ProposalId {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().expect("timestamp");
        let proposal = Proposal {
            id: ProposalId(id.to_string()),
            number: format!("ACM-00{}-JS-2026-REV00", id.len()),
            client_id: ClientId("client-acme".to_string()),
            responsible_user_id: None,
            status: ProposalStatus::Draft,
            discount_percent: Decimal::new(10, 0),
            revision: 0,
            line_items: Vec::new(),
            title: "Conveyor retrofit".to_string(),
            currency: "USD".to_string(),
            payment_terms: None,
            delivery_terms: None,
            validity_date: None,
            notes: None,
            attributes: BTreeMap::new(),
            created_by: UserId("user-joana".to_string()),
            created_at: at,
            updated_at: at,
        };
        SqlProposalRepository::new(pool.clone()).insert(&proposal).await.expect("seed proposal");
        proposal.id
    }

    fn pending(proposal_id: &ProposalId, discount: Decimal, offset_secs: i64) -> ApprovalRecord {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 9, 30, 0).single().expect("timestamp")
            + Duration::seconds(offset_secs);
        ApprovalRecord::pending(
            proposal_id.clone(),
            discount,
            UserId("user-joana".to_string()),
            at,
        )
    }

    #[tokio::test]
    async fn approval_round_trips_and_filters() {
        let pool = setup_pool().await;
        let first = seed_proposal(&pool, "P-1").await;
        let second = seed_proposal(&pool, "P-22").await;
        let repo = SqlApprovalRepository::new(pool);

        let a = pending(&first, Decimal::new(10, 0), 0);
        let b = pending(&first, Decimal::new(125, 1), 5);
        let c = pending(&second, Decimal::new(8, 0), 10);
        for record in [&b, &c, &a] {
            repo.insert(record).await.expect("insert");
        }

        let loaded = repo.find(&a.id).await.expect("find").expect("present");
        assert_eq!(loaded, a);

        let for_first = repo.list(&ApprovalFilter::for_proposal(first.clone())).await.expect("list");
        assert_eq!(for_first, vec![a.clone(), b.clone()]);

        let all = repo.list(&ApprovalFilter::default()).await.expect("list all");
        assert_eq!(all.len(), 3);

        let approved = ApprovalFilter { proposal_id: None, status: Some(ApprovalStatus::Approved) };
        assert!(repo.list(&approved).await.expect("list approved").is_empty());
    }

    #[tokio::test]
    async fn only_the_first_decision_is_applied() {
        let pool = setup_pool().await;
        let proposal_id = seed_proposal(&pool, "P-1").await;
        let repo = SqlApprovalRepository::new(pool);
        let record = pending(&proposal_id, Decimal::new(10, 0), 0);
        repo.insert(&record).await.expect("insert");

        let mut approve = record.clone();
        approve
            .decide(ApprovalDecision::Approved, UserId("user-marta".to_string()), None, Utc::now())
            .expect("decide");
        let mut reject = record.clone();
        reject
            .decide(
                ApprovalDecision::Rejected,
                UserId("user-marta".to_string()),
                Some("too deep".to_string()),
                Utc::now(),
            )
            .expect("decide");

        assert_eq!(repo.record_decision(&approve).await.expect("first"), DecisionWrite::Applied);
        match repo.record_decision(&reject).await.expect("second") {
            DecisionWrite::AlreadyDecided(current) => {
                assert_eq!(current.status, ApprovalStatus::Approved);
                assert_eq!(current.decided_by, Some(UserId("user-marta".to_string())));
                assert!(current.comment.is_none());
            }
            other => panic!("expected AlreadyDecided, got {other:?}"),
        }

        let mut ghost = pending(&proposal_id, Decimal::new(10, 0), 1);
        ghost
            .decide(ApprovalDecision::Approved, UserId("user-marta".to_string()), None, Utc::now())
            .expect("decide");
        assert_eq!(repo.record_decision(&ghost).await.expect("missing"), DecisionWrite::Missing);
    }

    #[tokio::test]
    async fn equal_pending_values_are_unique_per_proposal() {
        let pool = setup_pool().await;
        let proposal_id = seed_proposal(&pool, "P-1").await;
        let repo = SqlApprovalRepository::new(pool);

        let mut first = pending(&proposal_id, Decimal::new(60, 1), 0);
        repo.insert(&first).await.expect("insert");

        let same_value = pending(&proposal_id, Decimal::new(600, 2), 1);
        assert!(matches!(repo.insert(&same_value).await, Err(StoreError::Conflict(_))));
        repo.insert(&pending(&proposal_id, Decimal::new(65, 1), 2)).await.expect("other value");

        first
            .decide(ApprovalDecision::Rejected, UserId("user-marta".to_string()), None, Utc::now())
            .expect("decide");
        assert_eq!(repo.record_decision(&first).await.expect("reject"), DecisionWrite::Applied);
        repo.insert(&same_value).await.expect("value is free again once decided");
    }
}
