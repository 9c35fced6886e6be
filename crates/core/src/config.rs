use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::{default_threshold_pct, default_tolerance_pct, DiscountPolicy};
use crate::lifecycle::LifecycleSettings;
use crate::numbering::{NumberingPolicy, DEFAULT_SEQUENCE_WIDTH, GENERIC_USER_CODE};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub policy: PolicyConfig,
    pub numbering: NumberingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub discount_threshold_pct: Decimal,
    pub approval_tolerance_pct: Decimal,
}

#[derive(Clone, Debug)]
pub struct NumberingConfig {
    pub generic_user_code: String,
    pub sequence_width: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub discount_threshold_pct: Option<Decimal>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://propline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            policy: PolicyConfig {
                discount_threshold_pct: default_threshold_pct(),
                approval_tolerance_pct: default_tolerance_pct(),
            },
            numbering: NumberingConfig {
                generic_user_code: GENERIC_USER_CODE.to_string(),
                sequence_width: DEFAULT_SEQUENCE_WIDTH,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("propline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Policy and numbering knobs consumed by the proposal lifecycle.
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            policy: DiscountPolicy {
                threshold_pct: self.policy.discount_threshold_pct,
                tolerance_pct: self.policy.approval_tolerance_pct,
            },
            numbering: NumberingPolicy {
                generic_user_code: self.numbering.generic_user_code.clone(),
                sequence_width: self.numbering.sequence_width,
            },
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(policy) = patch.policy {
            if let Some(discount_threshold_pct) = policy.discount_threshold_pct {
                self.policy.discount_threshold_pct = discount_threshold_pct;
            }
            if let Some(approval_tolerance_pct) = policy.approval_tolerance_pct {
                self.policy.approval_tolerance_pct = approval_tolerance_pct;
            }
        }

        if let Some(numbering) = patch.numbering {
            if let Some(generic_user_code) = numbering.generic_user_code {
                self.numbering.generic_user_code = generic_user_code;
            }
            if let Some(sequence_width) = numbering.sequence_width {
                self.numbering.sequence_width = sequence_width;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PROPLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROPLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("PROPLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROPLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("PROPLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROPLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PROPLINE_SERVER_PORT") {
            self.server.port = parse_env("PROPLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PROPLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("PROPLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("PROPLINE_POLICY_DISCOUNT_THRESHOLD_PCT") {
            self.policy.discount_threshold_pct =
                parse_env("PROPLINE_POLICY_DISCOUNT_THRESHOLD_PCT", &value)?;
        }
        if let Some(value) = read_env("PROPLINE_POLICY_APPROVAL_TOLERANCE_PCT") {
            self.policy.approval_tolerance_pct =
                parse_env("PROPLINE_POLICY_APPROVAL_TOLERANCE_PCT", &value)?;
        }

        if let Some(value) = read_env("PROPLINE_NUMBERING_GENERIC_USER_CODE") {
            self.numbering.generic_user_code = value;
        }
        if let Some(value) = read_env("PROPLINE_NUMBERING_SEQUENCE_WIDTH") {
            self.numbering.sequence_width =
                parse_env("PROPLINE_NUMBERING_SEQUENCE_WIDTH", &value)?;
        }

        let log_level =
            read_env("PROPLINE_LOGGING_LEVEL").or_else(|| read_env("PROPLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROPLINE_LOGGING_FORMAT").or_else(|| read_env("PROPLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(discount_threshold_pct) = overrides.discount_threshold_pct {
            self.policy.discount_threshold_pct = discount_threshold_pct;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_policy(&self.policy)?;
        validate_numbering(&self.numbering)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("propline.toml"), PathBuf::from("config/propline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    if policy.discount_threshold_pct < Decimal::ZERO
        || policy.discount_threshold_pct > Decimal::ONE_HUNDRED
    {
        return Err(ConfigError::Validation(
            "policy.discount_threshold_pct must be in range 0..=100".to_string(),
        ));
    }

    if policy.approval_tolerance_pct <= Decimal::ZERO || policy.approval_tolerance_pct > Decimal::ONE
    {
        return Err(ConfigError::Validation(
            "policy.approval_tolerance_pct must be greater than 0 and at most 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_numbering(numbering: &NumberingConfig) -> Result<(), ConfigError> {
    let code = numbering.generic_user_code.trim();
    if code.is_empty() || !code.chars().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit()) {
        return Err(ConfigError::Validation(
            "numbering.generic_user_code must be uppercase letters or digits".to_string(),
        ));
    }

    if !(1..=9).contains(&numbering.sequence_width) {
        return Err(ConfigError::Validation(
            "numbering.sequence_width must be in range 1..=9".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    policy: Option<PolicyPatch>,
    numbering: Option<NumberingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    discount_threshold_pct: Option<Decimal>,
    approval_tolerance_pct: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct NumberingPatch {
    generic_user_code: Option<String>,
    sequence_width: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
