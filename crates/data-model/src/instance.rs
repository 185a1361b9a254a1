use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Canonical instance status, normalized from whatever vocabulary the
/// cloud provider uses (`SPEC_FULL.md` §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Building,
    Active,
    Error,
    Shutoff,
    Deleted,
}

impl InstanceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Building => "BUILDING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::Shutoff => "SHUTOFF",
            Self::Deleted => "DELETED",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Ulid,
    pub name: String,
    pub provider: String,
    pub provider_instance_id: Option<String>,
    pub status: InstanceStatus,
    pub ip_address: Option<String>,
    pub event_id: Option<Ulid>,
    pub assigned_to_user_id: Option<Ulid>,
    pub created_by_user_id: Option<Ulid>,
    pub error_message: Option<String>,
    /// SHA-256 hash of the single-use config-fetch bearer token.
    #[serde(skip_serializing)]
    pub config_token_hash: Option<String>,
    pub config_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Instance {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn needs_reconciliation(&self) -> bool {
        !self.is_deleted() && self.provider_instance_id.is_some() && !self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnCredential {
    pub id: Ulid,
    pub ipv4_address: Option<String>,
    pub ipv6_local: Option<String>,
    pub ipv6_global: Option<String>,
    #[serde(skip_serializing)]
    pub private_key: String,
    #[serde(skip_serializing)]
    pub preshared_key: Option<String>,
    pub endpoint: String,
    pub key_type: String,
    pub assigned_to_user_id: Option<Ulid>,
    pub assigned_to_username: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub is_available: bool,
    pub is_active: bool,
}
