use propline_core::config::{AppConfig, LoadOptions};
use propline_db::{connect_with_settings, migrations::MIGRATOR};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_discount_policy(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["discount_policy", "database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_discount_policy(config: &AppConfig) -> DoctorCheck {
    DoctorCheck {
        name: "discount_policy",
        status: CheckStatus::Pass,
        details: format!(
            "discounts above {}% need approval (match tolerance {})",
            config.policy.discount_threshold_pct.normalize(),
            config.policy.approval_tolerance_pct.normalize()
        ),
    }
}

/// Connectivity plus whether every embedded migration has been applied.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let applied: Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
                .fetch_one(&pool)
                .await;
        pool.close().await;
        Ok::<_, String>(applied.unwrap_or(0))
    });

    match result {
        Ok(applied) => {
            let expected = MIGRATOR
                .iter()
                .filter(|migration| migration.migration_type.is_up_migration())
                .count();
            let current = usize::try_from(applied).unwrap_or(0) >= expected;
            let mut details = format!("{applied} of {expected} migrations applied");
            if !current {
                details.push_str("; run `propline migrate`");
            }
            vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Pass,
                    details: format!("connected using `{}`", config.database.url),
                },
                DoctorCheck {
                    name: "schema_migrations",
                    status: if current { CheckStatus::Pass } else { CheckStatus::Fail },
                    details,
                },
            ]
        }
        Err(error) => vec![
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error },
            DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Skipped,
                details: "skipped because the database is unreachable".to_string(),
            },
        ],
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
