use async_trait::async_trait;
use cadre_data_model::{JobDescriptor, SchedulerStatus};
use cadre_storage::{RepositoryError, SchedulerStatusRepository};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;

use crate::{map_sqlx_err, ExecuteExt};

pub struct PgSchedulerStatusRepository<'c> {
    conn: &'c mut PgConnection,
    service_name: String,
}

impl<'c> PgSchedulerStatusRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection, service_name: impl Into<String>) -> Self {
        Self {
            conn,
            service_name: service_name.into(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StatusRow {
    service_name: String,
    is_running: bool,
    jobs: Value,
    last_heartbeat: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<StatusRow> for SchedulerStatus {
    fn from(r: StatusRow) -> Self {
        let jobs: Vec<JobDescriptor> = serde_json::from_value(r.jobs).unwrap_or_default();
        Self {
            service_name: r.service_name,
            is_running: r.is_running,
            jobs,
            last_heartbeat: r.last_heartbeat,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl<'c> SchedulerStatusRepository for PgSchedulerStatusRepository<'c> {
    #[tracing::instrument(name = "db.scheduler_status.read", skip_all, fields(db.statement, scheduler.service = self.service_name), err)]
    async fn read(&mut self) -> Result<Option<SchedulerStatus>, RepositoryError> {
        let row = sqlx::query_as!(
            StatusRow,
            r#"SELECT * FROM scheduler_status WHERE service_name = $1"#,
            self.service_name,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.scheduler_status.heartbeat", skip_all, fields(db.statement, scheduler.service = self.service_name), err)]
    async fn heartbeat(
        &mut self,
        now: DateTime<Utc>,
        running: bool,
        jobs: Vec<JobDescriptor>,
    ) -> Result<SchedulerStatus, RepositoryError> {
        let jobs_json =
            serde_json::to_value(&jobs).map_err(|e| RepositoryError::InvalidOperation(e.to_string()))?;

        let row = sqlx::query_as!(
            StatusRow,
            r#"
                INSERT INTO scheduler_status (service_name, is_running, jobs, last_heartbeat, updated_at)
                VALUES ($1, $2, $3, $4, $4)
                ON CONFLICT (service_name) DO UPDATE
                SET is_running = EXCLUDED.is_running,
                    jobs = EXCLUDED.jobs,
                    last_heartbeat = EXCLUDED.last_heartbeat,
                    updated_at = EXCLUDED.updated_at
                RETURNING *
            "#,
            self.service_name,
            running,
            jobs_json,
            now,
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }
}
