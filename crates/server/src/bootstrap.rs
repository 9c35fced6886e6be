use std::sync::Arc;

use propline_core::audit::AuditSink;
use propline_core::clock::SystemClock;
use propline_core::config::{AppConfig, ConfigError};
use propline_core::lifecycle::{Collaborators, ProposalLifecycle};
use propline_db::{
    connect_with_settings, migrations, DbPool, SqlApprovalRepository, SqlDirectoryRepository,
    SqlProposalRepository, SqlSequenceRepository,
};
use thiserror::Error;
use tracing::info;

use crate::audit_log::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub lifecycle: Arc<ProposalLifecycle>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let lifecycle = Arc::new(ProposalLifecycle::new(
        sql_collaborators(&db_pool, Arc::new(TracingAuditSink)),
        config.lifecycle_settings(),
    ));

    Ok(Application { config, db_pool, lifecycle })
}

fn sql_collaborators(pool: &DbPool, audit: Arc<dyn AuditSink>) -> Collaborators {
    let directory = Arc::new(SqlDirectoryRepository::new(pool.clone()));
    Collaborators {
        proposals: Arc::new(SqlProposalRepository::new(pool.clone())),
        approvals: Arc::new(SqlApprovalRepository::new(pool.clone())),
        sequences: Arc::new(SqlSequenceRepository::new(pool.clone())),
        clients: directory.clone(),
        users: directory,
        audit,
        clock: Arc::new(SystemClock),
    }
}

#[cfg(test)]
mod tests {
    use propline_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use propline_core::domain::directory::ClientId;
    use rust_decimal::Decimal;

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_policy() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                discount_threshold_pct: Some(Decimal::new(150, 0)),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("discount_threshold_pct"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_sql_stores() {
        let app = bootstrap(overrides("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('proposal', 'proposal_revision', 'approval_record', 'proposal_sequence')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 4);

        sqlx::query("INSERT INTO client (id, name, code) VALUES ('client-acme', 'Acme', 'ACM')")
            .execute(&app.db_pool)
            .await
            .expect("seed client");

        let number = app
            .lifecycle
            .generate_number(&ClientId("client-acme".to_string()), None, 0)
            .await
            .expect("number");
        assert!(number.number.starts_with("ACM-001-GEN-"));

        app.db_pool.close().await;
    }
}
