//! Human-readable proposal numbers: `{client}-{sequence}-{user}-{year}-REV{nn}`.

use std::sync::Arc;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::domain::directory::{ClientId, UserId};
use crate::store::{ClientDirectory, SequenceKey, SequenceStore, StoreError, UserDirectory};

pub const GENERIC_USER_CODE: &str = "GEN";
pub const FALLBACK_CLIENT_CODE: &str = "CLI";
pub const DEFAULT_SEQUENCE_WIDTH: usize = 3;
const MAX_CODE_LEN: usize = 3;
const REVISION_MARKER: &str = "-REV";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumberingPolicy {
    pub generic_user_code: String,
    pub sequence_width: usize,
}

impl Default for NumberingPolicy {
    fn default() -> Self {
        Self {
            generic_user_code: GENERIC_USER_CODE.to_string(),
            sequence_width: DEFAULT_SEQUENCE_WIDTH,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberResult {
    pub number: String,
    pub client_code: String,
    pub user_code: String,
    pub year: i32,
    pub sequence: u32,
    pub revision_index: u32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("a client reference is required to allocate a proposal number")]
    MissingClient,
    #[error("client `{0}` could not be resolved")]
    UnknownClient(ClientId),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub struct NumberAllocator {
    clients: Arc<dyn ClientDirectory>,
    users: Arc<dyn UserDirectory>,
    sequences: Arc<dyn SequenceStore>,
    clock: Arc<dyn Clock>,
    policy: NumberingPolicy,
}

impl NumberAllocator {
    pub fn new(
        clients: Arc<dyn ClientDirectory>,
        users: Arc<dyn UserDirectory>,
        sequences: Arc<dyn SequenceStore>,
        clock: Arc<dyn Clock>,
        policy: NumberingPolicy,
    ) -> Self {
        Self { clients, users, sequences, clock, policy }
    }

    /// Resolves the codes, then reserves the next sequence value for the
    /// `(client code, user code, year)` scope. The reservation is durable
    /// before this returns, so a failed caller leaves a gap rather than a
    /// duplicate.
    pub async fn allocate(
        &self,
        client_id: &ClientId,
        responsible_user_id: Option<&UserId>,
        revision_index: u32,
    ) -> Result<NumberResult, AllocationError> {
        if client_id.0.trim().is_empty() {
            return Err(AllocationError::MissingClient);
        }

        let client = self
            .clients
            .find_client(client_id)
            .await?
            .ok_or_else(|| AllocationError::UnknownClient(client_id.clone()))?;
        let client_code = derive_code(client.code.as_deref(), &client.name)
            .unwrap_or_else(|| FALLBACK_CLIENT_CODE.to_string());

        let user_code = match responsible_user_id {
            Some(user_id) => self
                .users
                .find_user(user_id)
                .await?
                .and_then(|user| derive_code(user.code.as_deref(), &user.name)),
            None => None,
        }
        .unwrap_or_else(|| self.policy.generic_user_code.clone());

        let year = self.clock.now().year();
        let key = SequenceKey { client_code: client_code.clone(), user_code: user_code.clone(), year };
        let sequence = self.sequences.next_value(&key).await?;

        Ok(NumberResult {
            number: format_number(
                &client_code,
                sequence,
                self.policy.sequence_width,
                &user_code,
                year,
                revision_index,
            ),
            client_code,
            user_code,
            year,
            sequence,
            revision_index,
        })
    }
}

pub fn format_number(
    client_code: &str,
    sequence: u32,
    width: usize,
    user_code: &str,
    year: i32,
    revision_index: u32,
) -> String {
    let suffix = revision_suffix(revision_index);
    format!("{client_code}-{sequence:0width$}-{user_code}-{year}-{suffix}")
}

pub fn revision_suffix(revision: u32) -> String {
    format!("REV{revision:02}")
}

/// Replaces the trailing `-REVnn` of `number`, or appends one if missing.
pub fn with_revision_suffix(number: &str, revision: u32) -> String {
    let base = match number.rfind(REVISION_MARKER) {
        Some(index) => {
            let digits = &number[index + REVISION_MARKER.len()..];
            if !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()) {
                &number[..index]
            } else {
                number
            }
        }
        None => number,
    };
    format!("{base}-{}", revision_suffix(revision))
}

/// Explicit codes win (uppercased, separators stripped). Otherwise the code is
/// built from the initials of a multi-word name, or the leading characters of
/// a single-word name.
pub fn derive_code(explicit: Option<&str>, name: &str) -> Option<String> {
    if let Some(code) = explicit.map(normalize_code).filter(|code| !code.is_empty()) {
        return Some(code);
    }

    let words: Vec<String> =
        name.split_whitespace().map(normalize_code).filter(|word| !word.is_empty()).collect();

    let code: String = match words.as_slice() {
        [] => return None,
        [single] => single.chars().take(MAX_CODE_LEN).collect(),
        many => many.iter().filter_map(|word| word.chars().next()).take(MAX_CODE_LEN).collect(),
    };
    Some(code)
}

fn normalize_code(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).map(|ch| ch.to_ascii_uppercase()).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::{
        derive_code, format_number, with_revision_suffix, AllocationError, NumberAllocator,
        NumberingPolicy,
    };
    use crate::clock::FixedClock;
    use crate::domain::directory::{ClientId, ClientProfile, UserId, UserProfile};
    use crate::store::{InMemoryDirectory, InMemorySequenceStore};

    fn allocator() -> NumberAllocator {
        let directory = Arc::new(
            InMemoryDirectory::default()
                .with_client(ClientProfile {
                    id: ClientId("client-acme".to_string()),
                    name: "Acme Industrial Machines".to_string(),
                    code: None,
                })
                .with_client(ClientProfile {
                    id: ClientId("client-globex".to_string()),
                    name: "Globex".to_string(),
                    code: Some("gbx-01".to_string()),
                })
                .with_user(UserProfile {
                    id: UserId("u-js".to_string()),
                    name: "Joana Silva".to_string(),
                    code: None,
                    may_approve_discounts: false,
                }),
        );
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().expect("date"));

        NumberAllocator::new(
            directory.clone(),
            directory,
            Arc::new(InMemorySequenceStore::default()),
            Arc::new(clock),
            NumberingPolicy::default(),
        )
    }

    #[test]
    fn codes_prefer_explicit_values_then_initials() {
        assert_eq!(derive_code(Some("gbx-01"), "Globex"), Some("GBX01".to_string()));
        assert_eq!(derive_code(None, "Acme Industrial Machines"), Some("AIM".to_string()));
        assert_eq!(derive_code(None, "Globex"), Some("GLO".to_string()));
        assert_eq!(derive_code(Some("  "), "joana silva"), Some("JS".to_string()));
        assert_eq!(derive_code(None, "--- !!"), None);
    }

    #[test]
    fn numbers_pad_sequence_and_revision() {
        assert_eq!(format_number("AIM", 7, 3, "JS", 2026, 0), "AIM-007-JS-2026-REV00");
        assert_eq!(format_number("AIM", 1234, 3, "GEN", 2026, 12), "AIM-1234-GEN-2026-REV12");
    }

    #[test]
    fn revision_suffix_is_rewritten_in_place() {
        assert_eq!(with_revision_suffix("AIM-007-JS-2026-REV00", 3), "AIM-007-JS-2026-REV03");
        assert_eq!(with_revision_suffix("LEGACY-42", 1), "LEGACY-42-REV01");
        assert_eq!(with_revision_suffix("X-REVIEW", 2), "X-REVIEW-REV02");
    }

    #[tokio::test]
    async fn first_allocation_for_a_scope_starts_at_one() {
        let allocator = allocator();
        let result = allocator
            .allocate(&ClientId("client-acme".to_string()), Some(&UserId("u-js".to_string())), 0)
            .await
            .expect("allocation");

        assert_eq!(result.number, "AIM-001-JS-2026-REV00");
        assert_eq!(result.sequence, 1);
        assert_eq!(result.year, 2026);
        assert!(result.number.ends_with("-2026-REV00"));

        let second = allocator
            .allocate(&ClientId("client-acme".to_string()), Some(&UserId("u-js".to_string())), 0)
            .await
            .expect("allocation");
        assert_eq!(second.number, "AIM-002-JS-2026-REV00");
    }

    #[tokio::test]
    async fn absent_or_unknown_users_fall_back_to_generic_code() {
        let allocator = allocator();
        let absent = allocator
            .allocate(&ClientId("client-globex".to_string()), None, 1)
            .await
            .expect("allocation");
        assert_eq!(absent.number, "GBX01-001-GEN-2026-REV01");

        let unknown = allocator
            .allocate(
                &ClientId("client-globex".to_string()),
                Some(&UserId("u-ghost".to_string())),
                0,
            )
            .await
            .expect("allocation");
        assert_eq!(unknown.user_code, "GEN");
        assert_eq!(unknown.sequence, 2);
    }

    #[tokio::test]
    async fn unresolvable_client_fails_allocation() {
        let allocator = allocator();
        let error = allocator
            .allocate(&ClientId("client-missing".to_string()), None, 0)
            .await
            .expect_err("unknown client");
        assert_eq!(error, AllocationError::UnknownClient(ClientId("client-missing".to_string())));

        let error =
            allocator.allocate(&ClientId(" ".to_string()), None, 0).await.expect_err("blank");
        assert_eq!(error, AllocationError::MissingClient);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_are_distinct_and_dense() {
        let allocator = Arc::new(allocator());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                tokio::spawn(async move {
                    allocator
                        .allocate(
                            &ClientId("client-acme".to_string()),
                            Some(&UserId("u-js".to_string())),
                            0,
                        )
                        .await
                })
            })
            .collect();

        let mut sequences = Vec::new();
        let mut numbers = HashSet::new();
        for handle in handles {
            let result = handle.await.expect("join").expect("allocation");
            sequences.push(result.sequence);
            numbers.insert(result.number);
        }

        sequences.sort_unstable();
        assert_eq!(numbers.len(), 32);
        assert_eq!(sequences, (1..=32).collect::<Vec<u32>>());
    }
}
