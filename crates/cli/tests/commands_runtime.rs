use std::env;
use std::sync::{Mutex, OnceLock};

use propline_cli::commands::{doctor, migrate, number, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PROPLINE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn invalid_discount_policy_fails_config_validation() {
    with_env(
        &[
            ("PROPLINE_DATABASE_URL", "sqlite::memory:"),
            ("PROPLINE_POLICY_DISCOUNT_THRESHOLD_PCT", "150"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.contains("discount_threshold_pct"), "unexpected message: {message}");
        },
    );
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_file_url(&dir, "seed.db");

    with_env(&[("PROPLINE_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");
        assert_eq!(first_payload["message"], "demo directory loaded: 2 clients, 3 users");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn number_allocates_from_the_seeded_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_file_url(&dir, "number.db");

    with_env(&[("PROPLINE_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0, "seed should succeed");

        let result = number::run("client-acme", Some("user-joana"), 0);
        assert_eq!(result.exit_code, 0, "expected number allocation success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "number");
        let allocated = payload["message"].as_str().unwrap_or_default();
        assert!(allocated.starts_with("ACM-001-JS-"), "unexpected number: {allocated}");
        assert!(allocated.ends_with("-REV00"), "unexpected number: {allocated}");
        assert_eq!(payload["data"]["sequence"], 1);
        assert_eq!(payload["data"]["number"], allocated);

        let next = parse_payload(&number::run("client-acme", None, 2).output);
        let allocated = next["message"].as_str().unwrap_or_default();
        assert!(allocated.starts_with("ACM-001-GEN-"), "unexpected number: {allocated}");
        assert!(allocated.ends_with("-REV02"), "unexpected number: {allocated}");
    });
}

#[test]
fn number_rejects_unknown_client() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_file_url(&dir, "unknown.db");

    with_env(&[("PROPLINE_DATABASE_URL", url.as_str())], || {
        let result = number::run("client-missing", None, 0);
        assert_eq!(result.exit_code, 7, "expected allocation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "allocation");
    });
}

#[test]
fn doctor_reports_pass_once_migrated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_file_url(&dir, "doctor.db");

    with_env(&[("PROPLINE_DATABASE_URL", url.as_str())], || {
        let before = parse_payload(&doctor::run(true));
        assert_eq!(before["overall_status"], "fail");

        assert_eq!(migrate::run().exit_code, 0, "migrate should succeed");

        let after = parse_payload(&doctor::run(true));
        assert_eq!(after["overall_status"], "pass");
        let names = after["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["config_validation", "discount_policy", "database_connectivity", "schema_migrations"]
        );
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn sqlite_file_url(dir: &tempfile::TempDir, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join(name).display())
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PROPLINE_DATABASE_URL",
        "PROPLINE_DATABASE_MAX_CONNECTIONS",
        "PROPLINE_DATABASE_TIMEOUT_SECS",
        "PROPLINE_SERVER_BIND_ADDRESS",
        "PROPLINE_SERVER_PORT",
        "PROPLINE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "PROPLINE_POLICY_DISCOUNT_THRESHOLD_PCT",
        "PROPLINE_POLICY_APPROVAL_TOLERANCE_PCT",
        "PROPLINE_NUMBERING_GENERIC_USER_CODE",
        "PROPLINE_NUMBERING_SEQUENCE_WIDTH",
        "PROPLINE_LOGGING_LEVEL",
        "PROPLINE_LOGGING_FORMAT",
        "PROPLINE_LOG_LEVEL",
        "PROPLINE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
