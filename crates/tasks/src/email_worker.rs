//! Batch Worker (`SPEC_FULL.md` §4.2): claims a batch of due queue rows and
//! hands each to the [`Mailer`], never letting a per-row failure escape the
//! batch boundary.

use cadre_clock::Clock;
use cadre_data_model::BatchLog;
use cadre_email::{Mailer, OutboundMessage};
use cadre_storage::{BatchLogRepository, EmailQueueRepository, UserRepository};
use cadre_storage_pg::{PgBatchLogRepository, PgEmailQueueRepository, PgUserRepository};
use sqlx::PgPool;
use ulid::Ulid;

use crate::error::TaskError;

/// Runs one batch tick: claim up to `batch_size` due rows and attempt
/// delivery for each. Returns the closed [`BatchLog`].
#[tracing::instrument(name = "tasks.email_worker.run_batch", skip(pool, mailer, clock), fields(worker.id = worker_id), err)]
pub async fn run_batch(
    pool: &PgPool,
    mailer: &dyn Mailer,
    clock: &dyn Clock,
    batch_size: i64,
    template_filter: Option<&str>,
    worker_id: &str,
) -> Result<BatchLog, TaskError> {
    let batch_id = Ulid::new().to_string();
    let now = clock.now();

    let mut tx = pool.begin().await?;
    let log_id = PgBatchLogRepository::new(&mut *tx).start(&batch_id, worker_id, now).await?;
    let rows = PgEmailQueueRepository::new(&mut *tx)
        .claim_due(now, batch_size, template_filter, &batch_id, worker_id)
        .await?;
    tx.commit().await?;

    let mut sent = 0i32;
    let mut failed = 0i32;

    for row in rows {
        match process_row(pool, mailer, clock, &row).await {
            Ok(true) => sent += 1,
            Ok(false) => failed += 1,
            Err(err) => {
                tracing::error!(error = %err, email.id = %row.id, "unexpected failure processing queue row, marking failed");
                if let Err(mark_err) = mark_row_failed(pool, clock, row.id, &err.to_string()).await {
                    tracing::error!(error = %mark_err, email.id = %row.id, "failed to record the failure itself");
                }
                failed += 1;
            }
        }
    }

    let mut tx = pool.begin().await?;
    let log = PgBatchLogRepository::new(&mut *tx).finish(log_id, sent, failed, clock.now()).await?;
    tx.commit().await?;

    Ok(log)
}

/// Processes one claimed row in its own transaction. Returns `Ok(true)` on
/// a successful send, `Ok(false)` on a classified failure already recorded
/// against the row (unknown recipient, provider rejection).
async fn process_row(
    pool: &PgPool,
    mailer: &dyn Mailer,
    clock: &dyn Clock,
    row: &cadre_data_model::EmailQueueRow,
) -> Result<bool, TaskError> {
    let mut tx = pool.begin().await?;

    let recipient = PgUserRepository::new(&mut *tx).lookup(row.user_id).await?;
    if recipient.is_none() {
        PgEmailQueueRepository::new(&mut *tx)
            .mark_failed(row.id, "recipient user no longer exists", clock.now())
            .await?;
        tx.commit().await?;
        return Ok(false);
    }

    let message = OutboundMessage {
        template_name: row.template_name.clone(),
        recipient_email: row.recipient_email.clone(),
        recipient_name: row.recipient_name.clone(),
        variables: row.custom_vars.clone(),
        attachment: None,
    };

    let outcome = mailer.send(message).await?;
    if outcome.ok {
        PgEmailQueueRepository::new(&mut *tx)
            .mark_sent(row.id, outcome.provider_message_id.as_deref().unwrap_or(""), clock.now())
            .await?;
        tx.commit().await?;
        Ok(true)
    } else {
        PgEmailQueueRepository::new(&mut *tx).mark_failed(row.id, &outcome.message, clock.now()).await?;
        tx.commit().await?;
        Ok(false)
    }
}

async fn mark_row_failed(pool: &PgPool, clock: &dyn Clock, row_id: Ulid, error: &str) -> Result<(), TaskError> {
    let mut tx = pool.begin().await?;
    PgEmailQueueRepository::new(&mut *tx).mark_failed(row_id, error, clock.now()).await?;
    tx.commit().await?;
    Ok(())
}
