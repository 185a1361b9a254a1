use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub year: i32,
    pub name: String,
    pub slug: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub registration_open: bool,
    pub test_mode: bool,
    pub is_active: bool,
    pub terms_version: Option<String>,
    pub terms_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn days_until_start(&self, today: NaiveDate) -> Option<i64> {
        self.start_date.map(|start| (start - today).num_days())
    }
}

/// Response status of an invited user's participation in one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    Invited,
    Confirmed,
    Declined,
    NoResponse,
}

impl ParticipationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Confirmed => "confirmed",
            Self::Declined => "declined",
            Self::NoResponse => "no_response",
        }
    }

    /// Statuses that still count as "never finally responded" for the
    /// invitation job's candidate-selection anti-join.
    #[must_use]
    pub fn is_outstanding(self) -> bool {
        matches!(self, Self::Invited | Self::NoResponse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventParticipation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub event_id: Ulid,
    pub invited_at: DateTime<Utc>,
    pub invited_by_user_id: Option<Ulid>,
    pub status: ParticipationStatus,
    pub responded_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub declined_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
