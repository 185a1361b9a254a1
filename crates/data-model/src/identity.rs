use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// The operation a queued identity-sync row represents against the
/// downstream IDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySyncOperation {
    Create,
    Update,
    Delete,
}

impl IdentitySyncOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A queued credential change destined for the downstream identity
/// provider. At-least-once delivery; see `SPEC_FULL.md` §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySyncRow {
    pub id: Ulid,
    pub user_id: Ulid,
    pub username: String,
    /// Encrypted credential; `None` for a delete operation.
    pub encrypted_credential: Option<String>,
    pub operation: IdentitySyncOperation,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Terminal permanent-failure marker, distinct from `synced`.
    pub failed: bool,
    pub created_at: DateTime<Utc>,
}
