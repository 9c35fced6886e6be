use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Reverts every applied migration.
pub async fn undo_all(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.undo(pool, 0).await
}

#[cfg(test)]
mod tests {
    use super::{run_pending, undo_all};
    use crate::{connect_with_settings, DbPool};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "client",
        "app_user",
        "proposal",
        "proposal_revision",
        "approval_record",
        "proposal_sequence",
        "idx_proposal_number",
        "idx_proposal_client_id",
        "idx_approval_record_proposal_id",
        "idx_approval_record_status",
        "idx_approval_record_pending_value",
    ];

    async fn schema_object_count(pool: &DbPool, name: &str) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'index') AND name = ?1",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("query sqlite_master")
    }

    #[tokio::test]
    async fn migrations_create_managed_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for name in MANAGED_SCHEMA_OBJECTS {
            assert_eq!(schema_object_count(&pool, name).await, 1, "missing schema object {name}");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        undo_all(&pool).await.expect("undo migrations");

        for name in MANAGED_SCHEMA_OBJECTS {
            assert_eq!(schema_object_count(&pool, name).await, 0, "leftover schema object {name}");
        }

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(schema_object_count(&pool, "proposal").await, 1);
    }

    #[tokio::test]
    async fn status_checks_reject_unknown_values() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let result = sqlx::query(
            "INSERT INTO proposal (id, number, client_id, status, discount_percent, revision,
                                   title, currency, created_by, created_at, updated_at)
             VALUES ('P-1', 'N-1', 'client-acme', 'archived', '0', 0, 'T', 'USD', 'u',
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;

        assert!(result.is_err());
    }
}
