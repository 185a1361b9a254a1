use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A user's role, which gates both admin capabilities and the test-mode
/// email restriction in the workflow dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Sponsor,
    Invitee,
}

impl UserRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Sponsor => "sponsor",
            Self::Invitee => "invitee",
        }
    }

    #[must_use]
    pub fn is_sponsor_or_above(self) -> bool {
        matches!(self, Self::Admin | Self::Sponsor)
    }
}

/// Deliverability state as reported by mailer webhook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Good,
    Bounced,
    SpamReported,
    Unsubscribed,
}

impl EmailStatus {
    #[must_use]
    pub fn is_deliverable(self) -> bool {
        matches!(self, Self::Good)
    }
}

/// An invited participant. See `SPEC_FULL.md` §3 for field provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    pub email_normalized: String,
    pub first_name: String,
    pub last_name: String,
    pub country: String,
    pub role: UserRole,
    pub sponsor_id: Option<Ulid>,

    /// External (downstream IDP) username, generated on first confirmation.
    pub pandas_username: Option<String>,
    /// Encrypted-at-rest external password. Never logged, never serialized
    /// to API responses.
    #[serde(skip_serializing)]
    pub pandas_password_encrypted: Option<String>,
    /// bcrypt hash for optional web-portal login.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    pub email_status: EmailStatus,
    pub confirmation_sent_at: Option<DateTime<Utc>>,
    pub is_active: bool,

    pub invite_sent_at: Option<DateTime<Utc>>,
    pub reminder_1_sent_at: Option<DateTime<Utc>>,
    pub reminder_2_sent_at: Option<DateTime<Utc>>,
    pub reminder_3_sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    #[must_use]
    pub fn is_sponsor_role(&self) -> bool {
        self.role.is_sponsor_or_above()
    }
}
