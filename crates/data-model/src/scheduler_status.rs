use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub name: String,
    pub next_run: Option<DateTime<Utc>>,
    pub trigger: String,
}

/// One row per worker service, upserted by the scheduler's own heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub service_name: String,
    pub is_running: bool,
    pub jobs: Vec<JobDescriptor>,
    pub last_heartbeat: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
