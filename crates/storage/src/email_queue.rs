use async_trait::async_trait;
use cadre_data_model::{EmailQueueRow, EmailQueueStats, TemplateVars};
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::RepositoryError;

/// Inputs to [`EmailQueueRepository::enqueue`]. A plain struct rather than
/// a long argument list.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub user_id: Ulid,
    pub recipient_email: String,
    pub recipient_name: String,
    pub template_name: String,
    pub priority: i32,
    pub custom_vars: TemplateVars,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub force: bool,
}

/// The durable email queue store. See `SPEC_FULL.md` §4.1 for the dedupe
/// and claim contracts — this trait's docs restate them so the Pg
/// implementation has a single normative source per method.
#[async_trait]
pub trait EmailQueueRepository: Send {
    /// Insert-or-return-existing per the three-step dedupe contract:
    /// 1. an existing `pending` row for (user_id, template_name) wins outright;
    /// 2. absent `force`, a `sent`/`processing` row within the last 24h wins;
    /// 3. otherwise insert a new `pending` row.
    async fn enqueue(
        &mut self,
        now: DateTime<Utc>,
        request: EnqueueRequest,
    ) -> Result<EmailQueueRow, RepositoryError>;

    /// Atomically claims up to `limit` due rows (`SPEC_FULL.md` §4.1),
    /// ordered by `(priority ASC, created_at ASC)`, transitioning them to
    /// `processing` and stamping `batch_id`/`worker_id`/`attempts`.
    async fn claim_due(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
        template_filter: Option<&str>,
        batch_id: &str,
        worker_id: &str,
    ) -> Result<Vec<EmailQueueRow>, RepositoryError>;

    async fn mark_sent(
        &mut self,
        row_id: Ulid,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Returns the row to `pending` unless `attempts >= max_attempts`, in
    /// which case it becomes terminally `failed`.
    async fn mark_failed(
        &mut self,
        row_id: Ulid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Cancels a `pending` row. Returns `false` if the row was not pending
    /// (already claimed, sent, or already cancelled).
    async fn mark_cancelled(&mut self, row_id: Ulid) -> Result<bool, RepositoryError>;

    async fn get_pending_for(
        &mut self,
        user_id: Ulid,
        template_name: &str,
    ) -> Result<Option<EmailQueueRow>, RepositoryError>;

    async fn get_recent_for(
        &mut self,
        user_id: Ulid,
        template_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<EmailQueueRow>, RepositoryError>;

    async fn stats(&mut self) -> Result<EmailQueueStats, RepositoryError>;
}
