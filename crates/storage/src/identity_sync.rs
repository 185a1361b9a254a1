use async_trait::async_trait;
use cadre_data_model::IdentitySyncRow;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::RepositoryError;

/// Repository for the downstream Identity Provider sync queue
/// (`SPEC_FULL.md` §4.7).
#[async_trait]
pub trait IdentitySyncRepository: Send {
    async fn enqueue(
        &mut self,
        user_id: Ulid,
        username: &str,
        encrypted_credential: Option<&str>,
        operation: cadre_data_model::IdentitySyncOperation,
    ) -> Result<IdentitySyncRow, RepositoryError>;

    /// Claims up to `limit` pending rows for processing, oldest first.
    async fn claim_pending(&mut self, limit: i64) -> Result<Vec<IdentitySyncRow>, RepositoryError>;

    async fn mark_synced(&mut self, id: Ulid, synced_at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Records a failed sync attempt. A `transient` failure (network error,
    /// downstream 5xx) returns the row to `pending` unless its retry budget
    /// is exhausted; a non-transient one (rejected credential, permanent
    /// lookup miss) fails the row immediately without spending retries.
    async fn mark_failed(&mut self, id: Ulid, error: &str, transient: bool) -> Result<(), RepositoryError>;

    async fn counts(&mut self) -> Result<IdentitySyncCounts, RepositoryError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySyncCounts {
    pub pending: i64,
    pub synced: i64,
    pub failed: i64,
}
