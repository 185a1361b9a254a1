use async_trait::async_trait;
use cadre_data_model::{AuditEventType, AuditLogEntry};
use serde_json::Value;
use ulid::Ulid;

use crate::RepositoryError;

/// Append-only audit trail (`SPEC_FULL.md` §4.11). Writes never fail the
/// caller's business transaction in the original system; callers here
/// still see a `Result` so they can choose to log-and-continue rather than
/// propagate, matching that behavior without hiding the error.
#[async_trait]
pub trait AuditLogRepository: Send {
    async fn record(
        &mut self,
        event_type: AuditEventType,
        actor_user_id: Option<Ulid>,
        subject_user_id: Option<Ulid>,
        details: Value,
    ) -> Result<AuditLogEntry, RepositoryError>;

    async fn recent_for_subject(&mut self, subject_user_id: Ulid, limit: i64) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}
