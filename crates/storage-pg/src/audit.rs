use async_trait::async_trait;
use cadre_data_model::{AuditEventType, AuditLogEntry};
use cadre_storage::{AuditLogRepository, RepositoryError};
use serde_json::Value;
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{map_sqlx_err, ExecuteExt};

pub struct PgAuditLogRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgAuditLogRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    event_type: String,
    actor_user_id: Option<Uuid>,
    subject_user_id: Option<Uuid>,
    details: Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn parse_event_type(s: &str) -> AuditEventType {
    match s {
        "workflow_blocked_test_mode" => AuditEventType::WorkflowBlockedTestMode,
        "login_rate_limited" => AuditEventType::LoginRateLimited,
        "license_token_consumed" => AuditEventType::LicenseTokenConsumed,
        "slot_acquired" => AuditEventType::SlotAcquired,
        "slot_released" => AuditEventType::SlotReleased,
        _ => AuditEventType::WorkflowTrigger,
    }
}

impl From<AuditRow> for AuditLogEntry {
    fn from(r: AuditRow) -> Self {
        Self {
            id: r.id.into(),
            event_type: parse_event_type(&r.event_type),
            actor_user_id: r.actor_user_id.map(Into::into),
            subject_user_id: r.subject_user_id.map(Into::into),
            details: r.details,
            created_at: r.created_at,
        }
    }
}

#[async_trait]
impl<'c> AuditLogRepository for PgAuditLogRepository<'c> {
    #[tracing::instrument(name = "db.audit_log.record", skip_all, fields(db.statement, audit.event_type = event_type.as_str()), err)]
    async fn record(
        &mut self,
        event_type: AuditEventType,
        actor_user_id: Option<Ulid>,
        subject_user_id: Option<Ulid>,
        details: Value,
    ) -> Result<AuditLogEntry, RepositoryError> {
        let id = Ulid::new();
        let row = sqlx::query_as!(
            AuditRow,
            r#"
                INSERT INTO audit_log (id, event_type, actor_user_id, subject_user_id, details, created_at)
                VALUES ($1, $2, $3, $4, $5, now())
                RETURNING *
            "#,
            Uuid::from(id),
            event_type.as_str(),
            actor_user_id.map(Uuid::from),
            subject_user_id.map(Uuid::from),
            details,
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.audit_log.recent_for_subject", skip_all, fields(db.statement, user.id = %subject_user_id), err)]
    async fn recent_for_subject(
        &mut self,
        subject_user_id: Ulid,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query_as!(
            AuditRow,
            r#"
                SELECT * FROM audit_log
                WHERE subject_user_id = $1
                ORDER BY created_at DESC
                LIMIT $2
            "#,
            Uuid::from(subject_user_id),
            limit,
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
