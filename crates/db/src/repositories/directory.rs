use async_trait::async_trait;
use sqlx::Row;

use propline_core::domain::directory::{ClientId, ClientProfile, UserId, UserProfile};
use propline_core::store::{ClientDirectory, StoreError, UserDirectory};

use super::{decode_error, RepositoryError};
use crate::DbPool;

/// Clients and users backing number allocation and approver checks.
pub struct SqlDirectoryRepository {
    pool: DbPool,
}

impl SqlDirectoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn client(&self, id: &ClientId) -> Result<Option<ClientProfile>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, code FROM client WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ClientProfile {
            id: ClientId(row.try_get("id").map_err(decode_error)?),
            name: row.try_get("name").map_err(decode_error)?,
            code: row.try_get("code").map_err(decode_error)?,
        }))
    }

    pub async fn user(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, code, may_approve_discounts FROM app_user WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let may_approve: i64 = row.try_get("may_approve_discounts").map_err(decode_error)?;
        Ok(Some(UserProfile {
            id: UserId(row.try_get("id").map_err(decode_error)?),
            name: row.try_get("name").map_err(decode_error)?,
            code: row.try_get("code").map_err(decode_error)?,
            may_approve_discounts: may_approve != 0,
        }))
    }

    pub async fn upsert_client(&self, client: &ClientProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO client (id, name, code) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, code = excluded.code",
        )
        .bind(&client.id.0)
        .bind(&client.name)
        .bind(&client.code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_user(&self, user: &UserProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO app_user (id, name, code, may_approve_discounts) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 code = excluded.code,
                 may_approve_discounts = excluded.may_approve_discounts",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(&user.code)
        .bind(i64::from(user.may_approve_discounts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ClientDirectory for SqlDirectoryRepository {
    async fn find_client(&self, id: &ClientId) -> Result<Option<ClientProfile>, StoreError> {
        Ok(self.client(id).await?)
    }
}

#[async_trait]
impl UserDirectory for SqlDirectoryRepository {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.user(id).await?)
    }
}
