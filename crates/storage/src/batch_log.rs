use async_trait::async_trait;
use cadre_data_model::BatchLog;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::RepositoryError;

/// Repository for `BatchLog` rows, one per Batch Worker run
/// (`SPEC_FULL.md` §4.2), used for observability and the scheduler status
/// surface rather than by any other component's control flow.
#[async_trait]
pub trait BatchLogRepository: Send {
    async fn start(&mut self, batch_id: &str, worker_id: &str, started_at: DateTime<Utc>) -> Result<Ulid, RepositoryError>;

    async fn finish(
        &mut self,
        id: Ulid,
        sent: i32,
        failed: i32,
        finished_at: DateTime<Utc>,
    ) -> Result<BatchLog, RepositoryError>;

    async fn recent(&mut self, limit: i64) -> Result<Vec<BatchLog>, RepositoryError>;
}
