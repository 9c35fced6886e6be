use async_trait::async_trait;
use sqlx::Row;

use propline_core::store::{SequenceKey, SequenceStore, StoreError};

use super::{decode_error, RepositoryError};
use crate::DbPool;

pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Single upsert statement, so concurrent callers serialize on the row and
    /// never observe the same value.
    pub async fn reserve(&self, key: &SequenceKey) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO proposal_sequence (client_code, user_code, year, last_value)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(client_code, user_code, year)
             DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
        )
        .bind(&key.client_code)
        .bind(&key.user_code)
        .bind(key.year)
        .fetch_one(&self.pool)
        .await?;

        let value: i64 = row.try_get("last_value").map_err(decode_error)?;
        u32::try_from(value)
            .map_err(|_| RepositoryError::Decode(format!("sequence value out of range: {value}")))
    }

    pub async fn current(&self, key: &SequenceKey) -> Result<Option<u32>, RepositoryError> {
        let value: Option<i64> = sqlx::query_scalar(
            "SELECT last_value FROM proposal_sequence
             WHERE client_code = ? AND user_code = ? AND year = ?",
        )
        .bind(&key.client_code)
        .bind(&key.user_code)
        .bind(key.year)
        .fetch_optional(&self.pool)
        .await?;

        value
            .map(|value| {
                u32::try_from(value).map_err(|_| {
                    RepositoryError::Decode(format!("sequence value out of range: {value}"))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl SequenceStore for SqlSequenceRepository {
    async fn next_value(&self, key: &SequenceKey) -> Result<u32, StoreError> {
        Ok(self.reserve(key).await?)
    }
}
