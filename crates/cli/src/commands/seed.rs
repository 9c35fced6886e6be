use propline_db::DemoDirectory;

use crate::commands::{connect_and_migrate, load_config, runtime, CommandResult, StepError};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;

        let seeded = DemoDirectory::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoDirectory::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if !verification.all_present {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&failed), 6u8));
        }

        Ok::<_, StepError>(seeded)
    });

    match result {
        Ok(seeded) => CommandResult::success(
            "seed",
            format!(
                "demo directory loaded: {} clients, {} users",
                seeded.clients_seeded, seeded.users_seeded
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
