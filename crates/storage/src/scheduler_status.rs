use async_trait::async_trait;
use cadre_data_model::{JobDescriptor, SchedulerStatus};
use chrono::{DateTime, Utc};

use crate::RepositoryError;

/// Repository for the single-row scheduler heartbeat (`SPEC_FULL.md` §4.4).
#[async_trait]
pub trait SchedulerStatusRepository: Send {
    async fn read(&mut self) -> Result<Option<SchedulerStatus>, RepositoryError>;

    async fn heartbeat(
        &mut self,
        now: DateTime<Utc>,
        running: bool,
        jobs: Vec<JobDescriptor>,
    ) -> Result<SchedulerStatus, RepositoryError>;
}
