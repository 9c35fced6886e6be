use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use propline_core::store::StoreError;

pub mod approval;
pub mod directory;
pub mod proposal;
pub mod sequence;

pub use approval::SqlApprovalRepository;
pub use directory::SqlDirectoryRepository;
pub use proposal::SqlProposalRepository;
pub use sequence::SqlSequenceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::Database(error)) if error.is_unique_violation())
    }
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        if value.is_unique_violation() {
            return StoreError::Conflict(value.to_string());
        }
        StoreError::Backend(value.to_string())
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw).map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
