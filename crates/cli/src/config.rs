// Copyright 2021-2026 The Cadre Project Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The typed configuration surface (`SPEC_FULL.md` §6): loaded from an
//! optional TOML file plus `CADRE_`-prefixed environment overrides (e.g.
//! `CADRE_DATABASE_URL`, `CADRE_LICENSE__TOKEN_TTL_SECONDS`).

use std::net::SocketAddr;

use cadre_tasks::config::{ReminderStage3Threshold, ReminderStageThreshold, ReminderThresholds, SchedulerConfig};
use serde::Deserialize;

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_bcrypt_cost() -> u32 {
    12
}

fn default_session_expiry_hours() -> i64 {
    24
}

fn default_license_slot_ttl_seconds() -> i64 {
    7200
}

fn default_license_token_ttl_seconds() -> i64 {
    7200
}

fn default_email_batch_size() -> i64 {
    50
}

fn default_identity_sync_batch_size() -> i64 {
    25
}

fn default_license_slot_reap_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Cadre".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeycloakConfig {
    #[serde(default)]
    pub enabled: bool,
    pub base_url: String,
    pub realm: String,
    pub admin_client_id: String,
    pub admin_client_secret: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DigitalOceanProviderConfig {
    pub api_token: Option<String>,
    #[serde(default = "default_do_region")]
    pub default_region: String,
    #[serde(default = "default_do_size")]
    pub default_size: String,
    pub ssh_key_id: Option<String>,
}

fn default_do_region() -> String {
    "nyc3".to_string()
}

fn default_do_size() -> String {
    "s-1vcpu-1gb".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenStackApplicationCredentialConfig {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenStackProviderConfig {
    pub auth_url: String,
    pub application_credential: OpenStackApplicationCredentialConfig,
    pub nova_url: Option<String>,
    pub neutron_url: Option<String>,
    pub glance_url: Option<String>,
    pub default_flavor_id: Option<String>,
    pub default_image_id: Option<String>,
    pub default_network_id: Option<String>,
    pub default_key_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CloudProvidersConfig {
    pub digitalocean: Option<DigitalOceanProviderConfig>,
    pub openstack: Option<OpenStackProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReminderStageThresholdConfig {
    #[serde(default = "default_true")]
    enabled: bool,
    days_after_invite: i64,
    min_days_before_event: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ReminderStage3ThresholdConfig {
    #[serde(default = "default_true")]
    enabled: bool,
    days_before_event: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ReminderThresholdsConfig {
    stage1: ReminderStageThresholdConfig,
    stage2: ReminderStageThresholdConfig,
    stage3: ReminderStage3ThresholdConfig,
}

impl From<ReminderThresholdsConfig> for ReminderThresholds {
    fn from(c: ReminderThresholdsConfig) -> Self {
        Self {
            stage1: ReminderStageThreshold { enabled: c.stage1.enabled, days_after_invite: c.stage1.days_after_invite, min_days_before_event: c.stage1.min_days_before_event },
            stage2: ReminderStageThreshold { enabled: c.stage2.enabled, days_after_invite: c.stage2.days_after_invite, min_days_before_event: c.stage2.min_days_before_event },
            stage3: ReminderStage3Threshold { enabled: c.stage3.enabled, days_before_event: c.stage3.days_before_event },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_session_expiry_hours")]
    pub session_expiry_hours: i64,

    #[serde(default = "default_email_batch_interval")]
    pub email_batch_interval_minutes: u64,
    #[serde(default = "default_email_discovery_interval")]
    pub email_discovery_interval_hours: u64,
    #[serde(default = "default_instance_sync_interval")]
    pub instance_sync_interval_seconds: u64,
    #[serde(default = "default_identity_sync_interval")]
    pub identity_sync_interval_minutes: u64,
    #[serde(default = "default_email_batch_size")]
    pub email_batch_size: i64,
    #[serde(default = "default_identity_sync_batch_size")]
    pub identity_sync_batch_size: i64,
    #[serde(default = "default_license_slot_reap_interval")]
    pub license_slot_reap_interval_minutes: u64,

    reminder_thresholds: Option<ReminderThresholdsConfig>,

    #[serde(default = "default_license_slot_ttl_seconds")]
    pub license_slot_ttl_seconds: i64,
    #[serde(default = "default_license_token_ttl_seconds")]
    pub license_token_ttl_seconds: i64,

    pub mail_webhook_key: Option<String>,
    pub test_email_override_address: Option<String>,

    #[serde(default = "default_environment")]
    pub environment: String,

    pub field_encryption_key: String,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    pub smtp: SmtpConfig,
    #[serde(default)]
    pub identity_provider: Option<KeycloakConfig>,
    #[serde(default)]
    pub cloud_providers: CloudProvidersConfig,
}

fn default_email_batch_interval() -> u64 {
    15
}

fn default_email_discovery_interval() -> u64 {
    2
}

fn default_instance_sync_interval() -> u64 {
    30
}

fn default_identity_sync_interval() -> u64 {
    10
}

impl Config {
    /// Loads configuration from `path` (if it exists) layered under
    /// `CADRE_`-prefixed environment variables, which take precedence —
    /// the same override order the `config` crate's users in this
    /// ecosystem expect.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("CADRE").separator("__"));
        builder.build()?.try_deserialize()
    }

    #[must_use]
    pub fn reminder_thresholds(&self) -> ReminderThresholds {
        self.reminder_thresholds.clone().map(Into::into).unwrap_or_default()
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            email_batch_interval: std::time::Duration::from_secs(self.email_batch_interval_minutes * 60),
            email_discovery_interval: std::time::Duration::from_secs(self.email_discovery_interval_hours * 3600),
            instance_sync_interval: std::time::Duration::from_secs(self.instance_sync_interval_seconds),
            identity_sync_interval: std::time::Duration::from_secs(self.identity_sync_interval_minutes * 60),
            reminder_interval: std::time::Duration::from_secs(3600),
            session_cleanup_interval: std::time::Duration::from_secs(3600),
            license_slot_reap_interval: std::time::Duration::from_secs(self.license_slot_reap_interval_minutes * 60),
            email_batch_size: self.email_batch_size,
            identity_sync_batch_size: self.identity_sync_batch_size,
            reminder_thresholds: self.reminder_thresholds(),
            service_name: "cadre-core".to_string(),
        }
    }
}
