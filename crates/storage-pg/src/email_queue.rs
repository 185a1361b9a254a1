use async_trait::async_trait;
use cadre_data_model::{EmailQueueRow, EmailQueueStats, EmailQueueStatus, TemplateVars};
use cadre_storage::{EmailQueueRepository, EnqueueRequest, RepositoryError};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{ensure_affected_rows, map_sqlx_err, ExecuteExt};

pub struct PgEmailQueueRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgEmailQueueRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    user_id: Uuid,
    recipient_email: String,
    recipient_name: String,
    template_name: String,
    custom_vars: Value,
    priority: i32,
    status: String,
    attempts: i32,
    max_attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    scheduled_for: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    provider_message_id: Option<String>,
    batch_id: Option<String>,
    worker_id: Option<String>,
}

fn parse_status(s: &str) -> EmailQueueStatus {
    match s {
        "processing" => EmailQueueStatus::Processing,
        "sent" => EmailQueueStatus::Sent,
        "failed" => EmailQueueStatus::Failed,
        "cancelled" => EmailQueueStatus::Cancelled,
        _ => EmailQueueStatus::Pending,
    }
}

impl From<QueueRow> for EmailQueueRow {
    fn from(r: QueueRow) -> Self {
        let custom_vars: TemplateVars = serde_json::from_value(r.custom_vars).unwrap_or_default();
        Self {
            id: r.id.into(),
            user_id: r.user_id.into(),
            recipient_email: r.recipient_email,
            recipient_name: r.recipient_name,
            template_name: r.template_name,
            custom_vars,
            priority: r.priority,
            status: parse_status(&r.status),
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            last_attempt_at: r.last_attempt_at,
            last_error: r.last_error,
            scheduled_for: r.scheduled_for,
            created_at: r.created_at,
            sent_at: r.sent_at,
            provider_message_id: r.provider_message_id,
            batch_id: r.batch_id,
            worker_id: r.worker_id,
        }
    }
}

#[async_trait]
impl<'c> EmailQueueRepository for PgEmailQueueRepository<'c> {
    #[tracing::instrument(name = "db.email_queue.enqueue", skip_all, fields(db.statement, user.id = %request.user_id, email.template = request.template_name), err)]
    async fn enqueue(
        &mut self,
        now: DateTime<Utc>,
        request: EnqueueRequest,
    ) -> Result<EmailQueueRow, RepositoryError> {
        // Step 1: an existing pending row for this (user, template) wins outright.
        if let Some(existing) = self
            .get_pending_for(request.user_id, &request.template_name)
            .await?
        {
            return Ok(existing);
        }

        // Step 2: absent `force`, a sent/processing row inside the dedupe
        // window wins too.
        if !request.force {
            let since = now - Duration::hours(24);
            if let Some(existing) = self
                .get_recent_for(request.user_id, &request.template_name, since)
                .await?
            {
                return Ok(existing);
            }
        }

        // Step 3: insert a new pending row.
        let id = Ulid::new();
        let custom_vars = serde_json::to_value(&request.custom_vars)
            .map_err(|e| RepositoryError::InvalidOperation(e.to_string()))?;

        sqlx::query!(
            r#"
                INSERT INTO email_queue
                    (id, user_id, recipient_email, recipient_name, template_name,
                     custom_vars, priority, status, attempts, max_attempts,
                     scheduled_for, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, 5, $8, $9)
            "#,
            Uuid::from(id),
            Uuid::from(request.user_id),
            request.recipient_email,
            request.recipient_name,
            request.template_name,
            custom_vars,
            request.priority,
            request.scheduled_for,
            now,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        let row = sqlx::query_as!(QueueRow, r#"SELECT * FROM email_queue WHERE id = $1"#, Uuid::from(id))
            .traced()
            .fetch_one(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.email_queue.claim_due", skip_all, fields(db.statement, batch.id = batch_id), err)]
    async fn claim_due(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
        template_filter: Option<&str>,
        batch_id: &str,
        worker_id: &str,
    ) -> Result<Vec<EmailQueueRow>, RepositoryError> {
        let rows = sqlx::query_as!(
            QueueRow,
            r#"
                UPDATE email_queue
                SET status = 'processing',
                    attempts = attempts + 1,
                    last_attempt_at = $1,
                    batch_id = $2,
                    worker_id = $3
                WHERE id IN (
                    SELECT id FROM email_queue
                    WHERE status = 'pending'
                      AND attempts < max_attempts
                      AND (scheduled_for IS NULL OR scheduled_for <= $1)
                      AND ($4::text IS NULL OR template_name = $4)
                    ORDER BY priority ASC, created_at ASC
                    LIMIT $5
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING *
            "#,
            now,
            batch_id,
            worker_id,
            template_filter,
            limit,
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(name = "db.email_queue.mark_sent", skip_all, fields(db.statement, email.id = %row_id), err)]
    async fn mark_sent(
        &mut self,
        row_id: Ulid,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let res = sqlx::query!(
            r#"
                UPDATE email_queue
                SET status = 'sent', sent_at = $2, provider_message_id = $3
                WHERE id = $1
            "#,
            Uuid::from(row_id),
            now,
            provider_message_id,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(name = "db.email_queue.mark_failed", skip_all, fields(db.statement, email.id = %row_id), err)]
    async fn mark_failed(
        &mut self,
        row_id: Ulid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let res = sqlx::query!(
            r#"
                UPDATE email_queue
                SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                    last_error = $2,
                    last_attempt_at = $3
                WHERE id = $1
            "#,
            Uuid::from(row_id),
            error,
            now,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(name = "db.email_queue.mark_cancelled", skip_all, fields(db.statement, email.id = %row_id), err)]
    async fn mark_cancelled(&mut self, row_id: Ulid) -> Result<bool, RepositoryError> {
        let res = sqlx::query!(
            r#"UPDATE email_queue SET status = 'cancelled' WHERE id = $1 AND status = 'pending'"#,
            Uuid::from(row_id),
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(res.rows_affected() == 1)
    }

    #[tracing::instrument(name = "db.email_queue.get_pending_for", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn get_pending_for(
        &mut self,
        user_id: Ulid,
        template_name: &str,
    ) -> Result<Option<EmailQueueRow>, RepositoryError> {
        let row = sqlx::query_as!(
            QueueRow,
            r#"
                SELECT * FROM email_queue
                WHERE user_id = $1 AND template_name = $2 AND status = 'pending'
                ORDER BY created_at DESC
                LIMIT 1
            "#,
            Uuid::from(user_id),
            template_name,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.email_queue.get_recent_for", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn get_recent_for(
        &mut self,
        user_id: Ulid,
        template_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<EmailQueueRow>, RepositoryError> {
        let row = sqlx::query_as!(
            QueueRow,
            r#"
                SELECT * FROM email_queue
                WHERE user_id = $1
                  AND template_name = $2
                  AND status IN ('sent', 'processing')
                  AND created_at >= $3
                ORDER BY created_at DESC
                LIMIT 1
            "#,
            Uuid::from(user_id),
            template_name,
            since,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.email_queue.stats", skip_all, fields(db.statement), err)]
    async fn stats(&mut self) -> Result<EmailQueueStats, RepositoryError> {
        let row = sqlx::query!(
            r#"
                SELECT
                    count(*) FILTER (WHERE status = 'pending') AS "pending!",
                    count(*) FILTER (WHERE status = 'processing') AS "processing!",
                    count(*) FILTER (WHERE status = 'sent') AS "sent!",
                    count(*) FILTER (WHERE status = 'failed') AS "failed!",
                    count(*) FILTER (WHERE status = 'cancelled') AS "cancelled!"
                FROM email_queue
            "#
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(EmailQueueStats {
            pending: row.pending,
            processing: row.processing,
            sent: row.sent,
            failed: row.failed,
            cancelled: row.cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_user(pool: &sqlx::PgPool) -> Ulid {
        let id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO users (user_id, email, email_normalized, first_name, last_name, country)
                VALUES ($1, $2, $2, 'Test', 'User', 'US')
            "#,
            Uuid::from(id),
            format!("{id}@example.com"),
        )
        .execute(pool)
        .await
        .expect("seed user");
        id
    }

    fn request(user_id: Ulid, template_name: &str) -> EnqueueRequest {
        EnqueueRequest {
            user_id,
            recipient_email: format!("{user_id}@example.com"),
            recipient_name: "Test User".to_string(),
            template_name: template_name.to_string(),
            priority: 100,
            custom_vars: TemplateVars::new(),
            scheduled_for: None,
            force: false,
        }
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn enqueue_returns_existing_pending_row_instead_of_duplicating(pool: sqlx::PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let user_id = seed_user(&pool).await;
        let now = Utc::now();

        let first = PgEmailQueueRepository::new(&mut conn).enqueue(now, request(user_id, "password")).await.expect("enqueue 1");
        let second = PgEmailQueueRepository::new(&mut conn).enqueue(now, request(user_id, "password")).await.expect("enqueue 2");

        assert_eq!(first.id, second.id);

        let count: i64 = sqlx::query_scalar!(r#"SELECT COUNT(*) FROM email_queue"#).fetch_one(&mut *conn).await.expect("count").unwrap_or_default();
        assert_eq!(count, 1);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn enqueue_respects_24h_sent_dedupe_window_unless_forced(pool: sqlx::PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let user_id = seed_user(&pool).await;
        let now = Utc::now();

        let row = PgEmailQueueRepository::new(&mut conn).enqueue(now, request(user_id, "password")).await.expect("enqueue");
        PgEmailQueueRepository::new(&mut conn).mark_sent(row.id, "msg-1", now).await.expect("mark_sent");

        let within_window = PgEmailQueueRepository::new(&mut conn)
            .enqueue(now + Duration::hours(1), request(user_id, "password"))
            .await
            .expect("enqueue within window");
        assert_eq!(within_window.id, row.id);

        let mut forced = request(user_id, "password");
        forced.force = true;
        let forced_row = PgEmailQueueRepository::new(&mut conn).enqueue(now + Duration::hours(1), forced).await.expect("forced enqueue");
        assert_ne!(forced_row.id, row.id);

        let count: i64 = sqlx::query_scalar!(r#"SELECT COUNT(*) FROM email_queue"#).fetch_one(&mut *conn).await.expect("count").unwrap_or_default();
        assert_eq!(count, 2);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn claim_due_orders_by_priority_then_created_at(pool: sqlx::PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let user_id = seed_user(&pool).await;
        let now = Utc::now();

        let mut low_priority = request(user_id, "newsletter");
        low_priority.priority = 200;
        let mut high_priority = request(user_id, "password");
        high_priority.priority = 1;

        let low = PgEmailQueueRepository::new(&mut conn).enqueue(now, low_priority).await.expect("enqueue low");
        let high = PgEmailQueueRepository::new(&mut conn).enqueue(now, high_priority).await.expect("enqueue high");

        let claimed = PgEmailQueueRepository::new(&mut conn).claim_due(now, 10, None, "batch-1", "worker-1").await.expect("claim_due");
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, high.id);
        assert_eq!(claimed[1].id, low.id);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn mark_failed_retries_until_max_attempts_then_terminates(pool: sqlx::PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let user_id = seed_user(&pool).await;
        let now = Utc::now();

        let row = PgEmailQueueRepository::new(&mut conn).enqueue(now, request(user_id, "password")).await.expect("enqueue");
        sqlx::query!(r#"UPDATE email_queue SET max_attempts = 2 WHERE id = $1"#, Uuid::from(row.id)).execute(&mut *conn).await.expect("set max_attempts");

        PgEmailQueueRepository::new(&mut conn).claim_due(now, 10, None, "batch-1", "worker-1").await.expect("claim 1");
        PgEmailQueueRepository::new(&mut conn).mark_failed(row.id, "smtp timeout", now).await.expect("mark_failed 1");

        let after_first: String = sqlx::query_scalar!(r#"SELECT status FROM email_queue WHERE id = $1"#, Uuid::from(row.id))
            .fetch_one(&mut *conn)
            .await
            .expect("status 1");
        assert_eq!(after_first, "pending");

        PgEmailQueueRepository::new(&mut conn).claim_due(now, 10, None, "batch-2", "worker-1").await.expect("claim 2");
        PgEmailQueueRepository::new(&mut conn).mark_failed(row.id, "smtp timeout again", now).await.expect("mark_failed 2");

        let after_second: String = sqlx::query_scalar!(r#"SELECT status FROM email_queue WHERE id = $1"#, Uuid::from(row.id))
            .fetch_one(&mut *conn)
            .await
            .expect("status 2");
        assert_eq!(after_second, "failed");
    }
}
