use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Lifecycle state of one [`EmailQueueRow`]. See `SPEC_FULL.md` §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailQueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl EmailQueueStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Free-form template variables. Values are always strings; stringify at
/// the edge rather than imposing a typed schema (`SPEC_FULL.md` §9).
pub type TemplateVars = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailQueueRow {
    pub id: Ulid,
    pub user_id: Ulid,
    pub recipient_email: String,
    pub recipient_name: String,
    pub template_name: String,
    pub custom_vars: TemplateVars,
    pub priority: i32,
    pub status: EmailQueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub batch_id: Option<String>,
    pub worker_id: Option<String>,
}

impl EmailQueueRow {
    /// Whether this row is eligible for `claim_due` right now.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EmailQueueStatus::Pending
            && self.attempts < self.max_attempts
            && self.scheduled_for.map_or(true, |t| t <= now)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailQueueStats {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// One row per batch worker invocation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLog {
    pub id: Ulid,
    pub batch_id: String,
    pub batch_size: i32,
    pub processed_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_processed: i32,
    pub total_sent: i32,
    pub total_failed: i32,
    pub duration_seconds: Option<i32>,
    pub error_message: Option<String>,
}

/// A rule mapping a domain trigger event to an email template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailWorkflow {
    pub id: Ulid,
    pub name: String,
    pub trigger_event: String,
    pub template_name: String,
    pub priority: i32,
    pub delay_minutes: Option<i32>,
    pub default_vars: TemplateVars,
    pub is_enabled: bool,
    pub is_system: bool,
}
