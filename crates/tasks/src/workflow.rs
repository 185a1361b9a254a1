//! Workflow Dispatcher (`SPEC_FULL.md` §4.3): the single chokepoint where
//! domain events become queued emails, and where the test-mode gate lives.

use std::sync::Arc;

use cadre_clock::Clock;
use cadre_data_model::{AuditEventType, TemplateVars};
use cadre_storage::{AuditLogRepository, EmailQueueRepository, EmailWorkflowRepository, EnqueueRequest, EventRepository, UserRepository};
use cadre_storage_pg::{
    PgAuditLogRepository, PgEmailQueueRepository, PgEmailWorkflowRepository, PgEventRepository, PgUserRepository,
};
use serde_json::json;
use sqlx::PgPool;
use ulid::Ulid;

use crate::error::TaskError;

pub struct WorkflowDispatcher {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl WorkflowDispatcher {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Enqueues one row per enabled workflow matching `event_name`, unless
    /// the active event is in test mode and `user_id` is not a sponsor —
    /// in which case nothing is enqueued and an audit entry records why.
    #[tracing::instrument(name = "workflow.trigger", skip_all, fields(workflow.event_name = event_name, user.id = %user_id), err)]
    pub async fn trigger(
        &self,
        event_name: &str,
        user_id: Ulid,
        variables: TemplateVars,
        force: bool,
    ) -> Result<usize, TaskError> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();

        let workflows = PgEmailWorkflowRepository::new(&mut *tx).find_enabled_for_trigger(event_name).await?;
        if workflows.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let active_event = PgEventRepository::new(&mut *tx).find_active().await?;
        if let Some(event) = &active_event {
            if event.test_mode {
                let user = PgUserRepository::new(&mut *tx).lookup(user_id).await?;
                let is_sponsor = user.map(|u| u.is_sponsor_role()).unwrap_or(false);
                if !is_sponsor {
                    PgAuditLogRepository::new(&mut *tx)
                        .record(
                            AuditEventType::WorkflowBlockedTestMode,
                            None,
                            Some(user_id),
                            json!({ "event_name": event_name }),
                        )
                        .await?;
                    tx.commit().await?;
                    return Ok(0);
                }
            }
        }

        let user = PgUserRepository::new(&mut *tx).lookup(user_id).await?.ok_or(TaskError::NotFound)?;

        let mut enqueued = 0usize;
        for workflow in workflows {
            let mut vars = workflow.default_vars.clone();
            for (key, value) in &variables {
                vars.insert(key.clone(), value.clone());
            }

            let scheduled_for = workflow.delay_minutes.map(|minutes| now + chrono::Duration::minutes(i64::from(minutes)));

            PgEmailQueueRepository::new(&mut *tx)
                .enqueue(
                    now,
                    EnqueueRequest {
                        user_id,
                        recipient_email: user.email.clone(),
                        recipient_name: user.full_name(),
                        template_name: workflow.template_name.clone(),
                        priority: workflow.priority,
                        custom_vars: vars,
                        scheduled_for,
                        force,
                    },
                )
                .await?;
            enqueued += 1;
        }

        PgAuditLogRepository::new(&mut *tx)
            .record(
                AuditEventType::WorkflowTrigger,
                None,
                Some(user_id),
                json!({ "event_name": event_name, "enqueued": enqueued }),
            )
            .await?;

        tx.commit().await?;
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use cadre_clock::{Clock, MockClock};
    use chrono::Utc;
    use sqlx::PgPool;
    use ulid::Ulid;

    use super::*;

    async fn seed_user(pool: &PgPool, role: &str) -> Ulid {
        let user_id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO users (user_id, email, email_normalized, first_name, last_name, country, role)
                VALUES ($1, $2, $2, 'Test', 'User', 'US', $3)
            "#,
            uuid::Uuid::from(user_id),
            format!("{user_id}@example.com"),
            role,
        )
        .execute(pool)
        .await
        .expect("seed user");
        user_id
    }

    async fn seed_active_event(pool: &PgPool, test_mode: bool) -> Ulid {
        let event_id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO events (event_id, year, name, slug, registration_open, test_mode, is_active)
                VALUES ($1, 2026, 'Test Event', $2, TRUE, $3, TRUE)
            "#,
            uuid::Uuid::from(event_id),
            format!("test-event-{event_id}"),
            test_mode,
        )
        .execute(pool)
        .await
        .expect("seed event");
        event_id
    }

    async fn seed_workflow(pool: &PgPool, trigger_event: &str) {
        sqlx::query!(
            r#"
                INSERT INTO email_workflows (id, name, trigger_event, template_name, priority, is_enabled, is_system)
                VALUES ($1, $2, $2, 'generic_notice', 100, TRUE, FALSE)
            "#,
            uuid::Uuid::from(Ulid::new()),
            trigger_event,
        )
        .execute(pool)
        .await
        .expect("seed workflow");
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn blocks_non_sponsor_during_test_mode_and_records_audit_entry(pool: PgPool) {
        seed_active_event(&pool, true).await;
        seed_workflow(&pool, "invitee_joined").await;
        let invitee = seed_user(&pool, "invitee").await;

        let clock: Arc<dyn Clock> = Arc::new(MockClock::at(Utc::now()));
        let dispatcher = WorkflowDispatcher::new(pool.clone(), clock);

        let enqueued = dispatcher
            .trigger("invitee_joined", invitee, TemplateVars::new(), false)
            .await
            .expect("trigger");
        assert_eq!(enqueued, 0);

        let queued: i64 = sqlx::query_scalar!(r#"SELECT COUNT(*) FROM email_queue"#)
            .fetch_one(&pool)
            .await
            .expect("count")
            .unwrap_or_default();
        assert_eq!(queued, 0);

        let blocked: i64 = sqlx::query_scalar!(
            r#"SELECT COUNT(*) FROM audit_log WHERE event_type = 'workflow_blocked_test_mode'"#
        )
        .fetch_one(&pool)
        .await
        .expect("count")
        .unwrap_or_default();
        assert_eq!(blocked, 1);
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn sponsor_bypasses_test_mode_gate_and_enqueues(pool: PgPool) {
        seed_active_event(&pool, true).await;
        seed_workflow(&pool, "invitee_joined").await;
        let sponsor = seed_user(&pool, "sponsor").await;

        let clock: Arc<dyn Clock> = Arc::new(MockClock::at(Utc::now()));
        let dispatcher = WorkflowDispatcher::new(pool.clone(), clock);

        let enqueued = dispatcher
            .trigger("invitee_joined", sponsor, TemplateVars::new(), false)
            .await
            .expect("trigger");
        assert_eq!(enqueued, 1);

        let queued: i64 = sqlx::query_scalar!(r#"SELECT COUNT(*) FROM email_queue"#)
            .fetch_one(&pool)
            .await
            .expect("count")
            .unwrap_or_default();
        assert_eq!(queued, 1);
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn retriggering_the_same_workflow_for_a_pending_row_does_not_duplicate(pool: PgPool) {
        seed_active_event(&pool, false).await;
        seed_workflow(&pool, "invitee_joined").await;
        let invitee = seed_user(&pool, "invitee").await;

        let clock: Arc<dyn Clock> = Arc::new(MockClock::at(Utc::now()));
        let dispatcher = WorkflowDispatcher::new(pool.clone(), clock);

        dispatcher.trigger("invitee_joined", invitee, TemplateVars::new(), false).await.expect("first trigger");
        dispatcher.trigger("invitee_joined", invitee, TemplateVars::new(), false).await.expect("second trigger");

        let queued: i64 = sqlx::query_scalar!(r#"SELECT COUNT(*) FROM email_queue WHERE status = 'pending'"#)
            .fetch_one(&pool)
            .await
            .expect("count")
            .unwrap_or_default();
        assert_eq!(queued, 1);
    }
}
