use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::RepositoryError;

/// Repository backing the hourly session-cleanup job (`SPEC_FULL.md`
/// §4.4). Session issuance/lookup is an HTTP-surface concern out of
/// scope here; the core only deletes rows past `expires_at`.
#[async_trait]
pub trait SessionRepository: Send {
    /// Deletes every session with `expires_at <= now`. Returns the number
    /// of rows removed.
    async fn delete_expired(&mut self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
