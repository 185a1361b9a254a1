use async_trait::async_trait;
use cadre_data_model::BatchLog;
use cadre_storage::{BatchLogRepository, RepositoryError};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{map_sqlx_err, ExecuteExt};

pub struct PgBatchLogRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgBatchLogRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BatchLogRow {
    id: Uuid,
    batch_id: String,
    batch_size: i32,
    processed_by: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    total_processed: i32,
    total_sent: i32,
    total_failed: i32,
    duration_seconds: Option<i32>,
    error_message: Option<String>,
}

impl From<BatchLogRow> for BatchLog {
    fn from(r: BatchLogRow) -> Self {
        Self {
            id: r.id.into(),
            batch_id: r.batch_id,
            batch_size: r.batch_size,
            processed_by: r.processed_by,
            started_at: r.started_at,
            completed_at: r.completed_at,
            total_processed: r.total_processed,
            total_sent: r.total_sent,
            total_failed: r.total_failed,
            duration_seconds: r.duration_seconds,
            error_message: r.error_message,
        }
    }
}

#[async_trait]
impl<'c> BatchLogRepository for PgBatchLogRepository<'c> {
    #[tracing::instrument(name = "db.batch_log.start", skip_all, fields(db.statement, batch.id = batch_id), err)]
    async fn start(
        &mut self,
        batch_id: &str,
        worker_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Ulid, RepositoryError> {
        let id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO batch_logs (id, batch_id, batch_size, processed_by, started_at, total_processed, total_sent, total_failed)
                VALUES ($1, $2, 0, $3, $4, 0, 0, 0)
            "#,
            Uuid::from(id),
            batch_id,
            worker_id,
            started_at,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(id)
    }

    #[tracing::instrument(name = "db.batch_log.finish", skip_all, fields(db.statement, batch_log.id = %id), err)]
    async fn finish(
        &mut self,
        id: Ulid,
        sent: i32,
        failed: i32,
        finished_at: DateTime<Utc>,
    ) -> Result<BatchLog, RepositoryError> {
        let row = sqlx::query_as!(
            BatchLogRow,
            r#"
                UPDATE batch_logs
                SET completed_at = $2,
                    total_sent = $3,
                    total_failed = $4,
                    total_processed = $3 + $4,
                    duration_seconds = EXTRACT(EPOCH FROM ($2 - started_at))::int
                WHERE id = $1
                RETURNING *
            "#,
            Uuid::from(id),
            finished_at,
            sent,
            failed,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.batch_log.recent", skip_all, fields(db.statement), err)]
    async fn recent(&mut self, limit: i64) -> Result<Vec<BatchLog>, RepositoryError> {
        let rows = sqlx::query_as!(
            BatchLogRow,
            r#"SELECT * FROM batch_logs ORDER BY started_at DESC LIMIT $1"#,
            limit,
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
