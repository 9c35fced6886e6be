use std::sync::Arc;

use propline_core::audit::NoopAuditSink;
use propline_core::clock::SystemClock;
use propline_core::config::AppConfig;
use propline_core::domain::directory::{ClientId, UserId};
use propline_core::lifecycle::{Collaborators, ProposalLifecycle};
use propline_core::numbering::NumberResult;
use propline_db::{
    DbPool, SqlApprovalRepository, SqlDirectoryRepository, SqlProposalRepository,
    SqlSequenceRepository,
};

use crate::commands::{connect_and_migrate, load_config, runtime, CommandResult, StepError};

/// Reserves a number exactly as proposal creation would. The sequence value is
/// consumed even if no proposal is ever saved under it.
pub fn run(client_id: &str, responsible_user_id: Option<&str>, revision_index: u32) -> CommandResult {
    let config = match load_config("number") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("number") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let client_id = ClientId(client_id.trim().to_string());
    let responsible_user_id =
        responsible_user_id.map(str::trim).filter(|id| !id.is_empty()).map(|id| UserId(id.to_string()));

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let lifecycle = lifecycle(&pool, &config);
        let allocated: Result<NumberResult, StepError> = lifecycle
            .generate_number(&client_id, responsible_user_id.as_ref(), revision_index)
            .await
            .map_err(|error| ("allocation", error.to_string(), 7u8));
        pool.close().await;
        allocated
    });

    match result {
        Ok(allocated) => {
            let data = serde_json::to_value(&allocated).ok();
            CommandResult::success_with_data("number", allocated.number.clone(), data)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("number", error_class, message, exit_code)
        }
    }
}

fn lifecycle(pool: &DbPool, config: &AppConfig) -> ProposalLifecycle {
    let directory = Arc::new(SqlDirectoryRepository::new(pool.clone()));
    let collaborators = Collaborators {
        proposals: Arc::new(SqlProposalRepository::new(pool.clone())),
        approvals: Arc::new(SqlApprovalRepository::new(pool.clone())),
        sequences: Arc::new(SqlSequenceRepository::new(pool.clone())),
        clients: directory.clone(),
        users: directory,
        audit: Arc::new(NoopAuditSink),
        clock: Arc::new(SystemClock),
    };
    ProposalLifecycle::new(collaborators, config.lifecycle_settings())
}
