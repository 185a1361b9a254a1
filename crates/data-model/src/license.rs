use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseProduct {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub license_blob: String,
    pub max_concurrent: i32,
    pub slot_ttl_seconds: i64,
    pub token_ttl_seconds: i64,
    pub download_filename: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseToken {
    pub id: Ulid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub product_id: Ulid,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_ip: Option<String>,
    pub instance_id: Option<Ulid>,
    pub expires_at: DateTime<Utc>,
}

impl LicenseToken {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Outcome recorded when an install slot is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseSlotResult {
    Success,
    Error,
    Expired,
    Unknown,
}

impl LicenseSlotResult {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

/// Outcome of [`crate::LicenseSlot`] acquisition, distinct from
/// [`LicenseSlotResult`] which records how a slot was *released*.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(LicenseSlot),
    CapacityExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseSlot {
    pub id: Ulid,
    pub slot_id: String,
    pub product_id: Ulid,
    pub hostname: String,
    pub ip_address: String,
    pub acquired_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub result: Option<LicenseSlotResult>,
    pub elapsed_seconds: Option<i32>,
    pub is_active: bool,
}
