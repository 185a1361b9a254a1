use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    WorkflowTrigger,
    WorkflowBlockedTestMode,
    LoginRateLimited,
    LicenseTokenConsumed,
    SlotAcquired,
    SlotReleased,
}

impl AuditEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowTrigger => "workflow_trigger",
            Self::WorkflowBlockedTestMode => "workflow_blocked_test_mode",
            Self::LoginRateLimited => "login_rate_limited",
            Self::LicenseTokenConsumed => "license_token_consumed",
            Self::SlotAcquired => "slot_acquired",
            Self::SlotReleased => "slot_released",
        }
    }
}

/// Append-only record of a domain-significant event. See `SPEC_FULL.md`
/// §4.11.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Ulid,
    pub event_type: AuditEventType,
    pub actor_user_id: Option<Ulid>,
    pub subject_user_id: Option<Ulid>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}
