//! Scheduling and job-tuning knobs consumed by this crate's `init()`. The
//! binary entrypoint loads these from the typed `Config` (`SPEC_FULL.md`
//! §6) and passes them in; nothing in this crate reads the environment
//! directly.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReminderStageThreshold {
    pub enabled: bool,
    pub days_after_invite: i64,
    pub min_days_before_event: i64,
}

#[derive(Debug, Clone)]
pub struct ReminderStage3Threshold {
    pub enabled: bool,
    pub days_before_event: i64,
}

#[derive(Debug, Clone)]
pub struct ReminderThresholds {
    pub stage1: ReminderStageThreshold,
    pub stage2: ReminderStageThreshold,
    pub stage3: ReminderStage3Threshold,
}

impl Default for ReminderThresholds {
    fn default() -> Self {
        Self {
            stage1: ReminderStageThreshold { enabled: true, days_after_invite: 7, min_days_before_event: 14 },
            stage2: ReminderStageThreshold { enabled: true, days_after_invite: 14, min_days_before_event: 7 },
            stage3: ReminderStage3Threshold { enabled: true, days_before_event: 3 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub email_batch_interval: Duration,
    pub email_discovery_interval: Duration,
    pub instance_sync_interval: Duration,
    pub identity_sync_interval: Duration,
    pub reminder_interval: Duration,
    pub session_cleanup_interval: Duration,
    pub license_slot_reap_interval: Duration,
    pub email_batch_size: i64,
    pub identity_sync_batch_size: i64,
    pub reminder_thresholds: ReminderThresholds,
    pub service_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            email_batch_interval: Duration::from_secs(15 * 60),
            email_discovery_interval: Duration::from_secs(2 * 60 * 60),
            instance_sync_interval: Duration::from_secs(30),
            identity_sync_interval: Duration::from_secs(10 * 60),
            reminder_interval: Duration::from_secs(60 * 60),
            session_cleanup_interval: Duration::from_secs(60 * 60),
            license_slot_reap_interval: Duration::from_secs(5 * 60),
            email_batch_size: 50,
            identity_sync_batch_size: 25,
            reminder_thresholds: ReminderThresholds::default(),
            service_name: "cadre-core".to_string(),
        }
    }
}
