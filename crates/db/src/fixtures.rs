//! Demo directory fixtures.
//!
//! Seeds a small, deterministic set of clients and users so a fresh database
//! can allocate numbers and decide approvals without an external directory:
//! 1. A client with an explicit code and one whose code derives from its name
//! 2. A sales user with a code, one without, and one discount approver

use sqlx::Executor;

use crate::repositories::RepositoryError;
use crate::DbPool;

const SEED_CLIENT_IDS: &[&str] = &["client-acme", "client-globex"];
const SEED_USERS: &[SeedUser] = &[
    SeedUser { id: "user-joana", may_approve_discounts: false },
    SeedUser { id: "user-rafael", may_approve_discounts: false },
    SeedUser { id: "user-marta", may_approve_discounts: true },
];

#[derive(Debug, Clone, Copy)]
struct SeedUser {
    id: &'static str,
    may_approve_discounts: bool,
}

pub struct DemoDirectory;

impl DemoDirectory {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_directory.sql");

    /// Idempotent: re-loading overwrites names, codes and approver flags.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult { clients_seeded: SEED_CLIENT_IDS.len(), users_seeded: SEED_USERS.len() })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for client_id in SEED_CLIENT_IDS {
            let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM client WHERE id = ?1)")
                .bind(*client_id)
                .fetch_one(pool)
                .await?;
            checks.push((*client_id, exists == 1));
        }

        for user in SEED_USERS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM app_user WHERE id = ?1 AND may_approve_discounts = ?2)",
            )
            .bind(user.id)
            .bind(i64::from(user.may_approve_discounts))
            .fetch_one(pool)
            .await?;
            checks.push((user.id, exists == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let client_ids = sql_array_from_ids(SEED_CLIENT_IDS);
        let user_ids =
            sql_array_from_ids(&SEED_USERS.iter().map(|user| user.id).collect::<Vec<_>>());

        sqlx::query(&format!("DELETE FROM client WHERE id IN {client_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM app_user WHERE id IN {user_ids}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(", ");
    format!("({quoted})")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedResult {
    pub clients_seeded: usize,
    pub users_seeded: usize,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use propline_core::domain::directory::{ClientId, UserId};
    use propline_core::store::{ClientDirectory, UserDirectory};

    use super::*;
    use crate::repositories::SqlDirectoryRepository;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(DemoDirectory::SQL.contains("client-acme"));
        assert!(DemoDirectory::SQL.contains("user-marta"));
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoDirectory::load(&pool).await.expect("load");
        let first_verification = DemoDirectory::verify(&pool).await.expect("verify");
        assert!(first_verification.all_present);

        let second = DemoDirectory::load(&pool).await.expect("reload");
        let second_verification = DemoDirectory::verify(&pool).await.expect("re-verify");
        assert_eq!(first, second);
        assert_eq!(first_verification.checks, second_verification.checks);

        let clients: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM client").fetch_one(&pool).await.expect("count");
        assert_eq!(clients, 2);
    }

    #[tokio::test]
    async fn seeded_profiles_resolve_through_the_directory() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        DemoDirectory::load(&pool).await.expect("load");

        let directory = SqlDirectoryRepository::new(pool.clone());
        let globex = directory
            .find_client(&ClientId("client-globex".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(globex.code, None);

        let marta = directory
            .find_user(&UserId("user-marta".to_string()))
            .await
            .expect("find")
            .expect("present");
        assert!(marta.may_approve_discounts);

        DemoDirectory::clean(&pool).await.expect("clean");
        let verification = DemoDirectory::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
    }
}
