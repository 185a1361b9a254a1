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

//! Cloud provider abstraction used by the instance lifecycle jobs, plus
//! cloud-init template rendering.
//!
//! One [`CloudProvider`] trait, two implementations (OpenStack Compute
//! and DigitalOcean's Droplet API), each normalizing its own status
//! vocabulary down to [`cadre_data_model::InstanceStatus`].

pub mod cloud_init;
pub mod digitalocean;
pub mod openstack;

use async_trait::async_trait;
use cadre_data_model::InstanceStatus;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("request to provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned an unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("instance {0} not found")]
    NotFound(String),
}

/// A newly created or polled provider-side instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInstance {
    pub provider_instance_id: String,
    pub raw_status: String,
    pub ip_address: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, Default)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub size: String,
    pub image: String,
    pub region: Option<String>,
    pub network: Option<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
}

/// The contract every cloud backend implements (`SPEC_FULL.md` §4.9).
/// `normalize_status`/`extract_ip_address` are pure functions over
/// provider payloads so the reconciler can call them without another
/// network round trip.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authenticate(&self) -> Result<(), CloudError>;

    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<ProviderInstance, CloudError>;

    async fn delete_instance(&self, provider_instance_id: &str) -> Result<(), CloudError>;

    async fn get_instance_status(&self, provider_instance_id: &str) -> Result<Option<ProviderInstance>, CloudError>;

    async fn list_sizes(&self) -> Result<Vec<Value>, CloudError>;

    async fn list_images(&self) -> Result<Vec<Value>, CloudError>;

    async fn list_regions_or_networks(&self) -> Result<Vec<Value>, CloudError>;

    fn normalize_status(&self, provider_status: &str) -> InstanceStatus;

    fn extract_ip_address(&self, raw: &Value) -> Option<String>;
}
