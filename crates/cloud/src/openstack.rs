//! OpenStack backend: Keystone v3 token auth, Nova compute, Neutron
//! networks, Glance images.

use std::sync::Mutex;

use async_trait::async_trait;
use cadre_data_model::InstanceStatus;
use reqwest::Client;
use serde_json::{json, Value};

use crate::{CloudError, CloudProvider, CreateInstanceRequest, ProviderInstance};

pub enum OpenStackAuthMethod {
    ApplicationCredential { id: String, secret: String },
    Password { username: String, password: String, project_name: String, user_domain_name: String, project_domain_name: String },
}

pub struct OpenStackConfig {
    pub auth_url: String,
    pub auth_method: OpenStackAuthMethod,
    pub nova_url: Option<String>,
    pub neutron_url: Option<String>,
    pub glance_url: Option<String>,
    pub default_flavor_id: Option<String>,
    pub default_image_id: Option<String>,
    pub default_network_id: Option<String>,
    pub default_key_name: Option<String>,
}

pub struct OpenStackProvider {
    client: Client,
    config: OpenStackConfig,
    token: Mutex<Option<ScopedToken>>,
}

struct ScopedToken {
    value: String,
    nova_url: String,
    neutron_url: String,
    glance_url: String,
}

impl OpenStackProvider {
    #[must_use]
    pub fn new(client: Client, config: OpenStackConfig) -> Self {
        Self { client, config, token: Mutex::new(None) }
    }

    fn auth_request_body(&self) -> Value {
        match &self.config.auth_method {
            OpenStackAuthMethod::ApplicationCredential { id, secret } => json!({
                "auth": {
                    "identity": {
                        "methods": ["application_credential"],
                        "application_credential": { "id": id, "secret": secret }
                    }
                }
            }),
            OpenStackAuthMethod::Password { username, password, project_name, user_domain_name, project_domain_name } => json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": username,
                                "password": password,
                                "domain": { "name": user_domain_name }
                            }
                        }
                    },
                    "scope": {
                        "project": {
                            "name": project_name,
                            "domain": { "name": project_domain_name }
                        }
                    }
                }
            }),
        }
    }

    /// Issues a fresh token from Keystone and caches the catalog-derived
    /// service endpoints, falling back to the explicitly configured
    /// overrides when present.
    async fn ensure_token(&self) -> Result<(), CloudError> {
        if self.token.lock().unwrap().is_some() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/')))
            .json(&self.auth_request_body())
            .send()
            .await?;
        let response = response.error_for_status().map_err(CloudError::Request)?;

        let token_header = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CloudError::UnexpectedResponse("keystone response missing X-Subject-Token".to_string()))?
            .to_string();

        let body: Value = response.json().await?;
        let catalog = body["token"]["catalog"].as_array().cloned().unwrap_or_default();

        let nova_url = self.config.nova_url.clone().or_else(|| catalog_endpoint(&catalog, "compute")).ok_or_else(|| {
            CloudError::NotConfigured("no compute endpoint in catalog and OS_NOVA_URL is not set".to_string())
        })?;
        let neutron_url = self.config.neutron_url.clone().or_else(|| catalog_endpoint(&catalog, "network")).ok_or_else(|| {
            CloudError::NotConfigured("no network endpoint in catalog and OS_NEUTRON_URL is not set".to_string())
        })?;
        let glance_url = self.config.glance_url.clone().or_else(|| catalog_endpoint(&catalog, "image")).ok_or_else(|| {
            CloudError::NotConfigured("no image endpoint in catalog and OS_GLANCE_URL is not set".to_string())
        })?;

        *self.token.lock().unwrap() = Some(ScopedToken { value: token_header, nova_url, neutron_url, glance_url });
        Ok(())
    }

    fn snapshot(&self) -> Result<(String, String, String, String), CloudError> {
        let guard = self.token.lock().unwrap();
        let token = guard.as_ref().ok_or_else(|| CloudError::NotConfigured("openstack session not established".to_string()))?;
        Ok((token.value.clone(), token.nova_url.clone(), token.neutron_url.clone(), token.glance_url.clone()))
    }
}

fn catalog_endpoint(catalog: &[Value], service_type: &str) -> Option<String> {
    catalog.iter().find(|entry| entry["type"].as_str() == Some(service_type)).and_then(|entry| {
        entry["endpoints"]
            .as_array()?
            .iter()
            .find(|endpoint| endpoint["interface"].as_str() == Some("public"))
            .and_then(|endpoint| endpoint["url"].as_str())
            .map(ToString::to_string)
    })
}

#[async_trait]
impl CloudProvider for OpenStackProvider {
    fn name(&self) -> &'static str {
        "openstack"
    }

    #[tracing::instrument(name = "cloud.openstack.authenticate", skip_all, err)]
    async fn authenticate(&self) -> Result<(), CloudError> {
        self.ensure_token().await
    }

    #[tracing::instrument(name = "cloud.openstack.create_instance", skip_all, fields(instance.name = %request.name), err)]
    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<ProviderInstance, CloudError> {
        self.ensure_token().await?;
        let (token, nova_url, _, _) = self.snapshot()?;

        let image = if request.image.is_empty() { self.config.default_image_id.clone().unwrap_or_default() } else { request.image };
        let flavor = if request.size.is_empty() { self.config.default_flavor_id.clone().unwrap_or_default() } else { request.size };
        let network = request.network.or_else(|| self.config.default_network_id.clone());
        let key_name = request.key_name.or_else(|| self.config.default_key_name.clone());

        let mut server = json!({
            "name": request.name,
            "imageRef": image,
            "flavorRef": flavor,
        });
        if let Some(network) = network {
            server["networks"] = json!([{ "uuid": network }]);
        }
        if let Some(key_name) = key_name {
            server["key_name"] = json!(key_name);
        }
        if let Some(user_data) = request.user_data {
            server["user_data"] = json!(user_data);
        }

        let response = self
            .client
            .post(format!("{}/servers", nova_url.trim_end_matches('/')))
            .header("X-Auth-Token", &token)
            .json(&json!({ "server": server }))
            .send()
            .await?;
        let response = response.error_for_status().map_err(CloudError::Request)?;
        let data: Value = response.json().await?;
        let server = data.get("server").ok_or_else(|| CloudError::UnexpectedResponse(data.to_string()))?.clone();

        let id = server["id"].as_str().ok_or_else(|| CloudError::UnexpectedResponse("server response missing id".to_string()))?.to_string();
        let raw_status = server["status"].as_str().unwrap_or("BUILD").to_string();
        let ip_address = self.extract_ip_address(&server);

        Ok(ProviderInstance { provider_instance_id: id, raw_status, ip_address, raw: server })
    }

    #[tracing::instrument(name = "cloud.openstack.delete_instance", skip_all, fields(instance.provider_id = provider_instance_id), err)]
    async fn delete_instance(&self, provider_instance_id: &str) -> Result<(), CloudError> {
        self.ensure_token().await?;
        let (token, nova_url, _, _) = self.snapshot()?;

        let response = self
            .client
            .delete(format!("{}/servers/{provider_instance_id}", nova_url.trim_end_matches('/')))
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        match response.status().as_u16() {
            202 | 204 | 404 => Ok(()),
            _ => Err(CloudError::UnexpectedResponse(format!("delete server {provider_instance_id} returned {}", response.status()))),
        }
    }

    #[tracing::instrument(name = "cloud.openstack.get_instance_status", skip_all, fields(instance.provider_id = provider_instance_id), err)]
    async fn get_instance_status(&self, provider_instance_id: &str) -> Result<Option<ProviderInstance>, CloudError> {
        self.ensure_token().await?;
        let (token, nova_url, _, _) = self.snapshot()?;

        let response = self
            .client
            .get(format!("{}/servers/{provider_instance_id}", nova_url.trim_end_matches('/')))
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(CloudError::Request)?;
        let data: Value = response.json().await?;
        let Some(server) = data.get("server").cloned() else {
            return Ok(None);
        };
        let raw_status = server["status"].as_str().unwrap_or("").to_string();
        let ip_address = self.extract_ip_address(&server);
        Ok(Some(ProviderInstance { provider_instance_id: provider_instance_id.to_string(), raw_status, ip_address, raw: server }))
    }

    async fn list_sizes(&self) -> Result<Vec<Value>, CloudError> {
        self.ensure_token().await?;
        let (token, nova_url, _, _) = self.snapshot()?;
        let response = self
            .client
            .get(format!("{}/flavors/detail", nova_url.trim_end_matches('/')))
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        let response = response.error_for_status().map_err(CloudError::Request)?;
        let data: Value = response.json().await?;
        Ok(data.get("flavors").and_then(Value::as_array).cloned().unwrap_or_default())
    }

    async fn list_images(&self) -> Result<Vec<Value>, CloudError> {
        self.ensure_token().await?;
        let (token, _, _, glance_url) = self.snapshot()?;
        let response = self
            .client
            .get(format!("{}/v2/images", glance_url.trim_end_matches('/')))
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        let response = response.error_for_status().map_err(CloudError::Request)?;
        let data: Value = response.json().await?;
        Ok(data.get("images").and_then(Value::as_array).cloned().unwrap_or_default())
    }

    async fn list_regions_or_networks(&self) -> Result<Vec<Value>, CloudError> {
        self.ensure_token().await?;
        let (token, _, neutron_url, _) = self.snapshot()?;
        let response = self
            .client
            .get(format!("{}/v2.0/networks", neutron_url.trim_end_matches('/')))
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        let response = response.error_for_status().map_err(CloudError::Request)?;
        let data: Value = response.json().await?;
        Ok(data.get("networks").and_then(Value::as_array).cloned().unwrap_or_default())
    }

    fn normalize_status(&self, provider_status: &str) -> InstanceStatus {
        match provider_status.to_uppercase().as_str() {
            "BUILD" => InstanceStatus::Building,
            "ACTIVE" | "REBOOT" | "HARD_REBOOT" | "RESIZE" | "VERIFY_RESIZE" | "MIGRATING" | "REBUILD" | "PASSWORD" => InstanceStatus::Active,
            "ERROR" => InstanceStatus::Error,
            "SHUTOFF" | "PAUSED" | "SUSPENDED" => InstanceStatus::Shutoff,
            "DELETED" | "SOFT_DELETED" => InstanceStatus::Deleted,
            _ => InstanceStatus::Building,
        }
    }

    fn extract_ip_address(&self, raw: &Value) -> Option<String> {
        let addresses = raw.get("addresses")?.as_object()?;
        for network_addrs in addresses.values() {
            if let Some(addrs) = network_addrs.as_array() {
                for addr in addrs {
                    if addr.get("version").and_then(Value::as_u64) == Some(4) {
                        if let Some(ip) = addr.get("addr").and_then(Value::as_str) {
                            return Some(ip.to_string());
                        }
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OpenStackProvider {
        OpenStackProvider::new(
            Client::new(),
            OpenStackConfig {
                auth_url: "https://keystone.example.invalid/v3".to_string(),
                auth_method: OpenStackAuthMethod::ApplicationCredential { id: "id".to_string(), secret: "secret".to_string() },
                nova_url: Some("https://nova.example.invalid/v2.1".to_string()),
                neutron_url: Some("https://neutron.example.invalid".to_string()),
                glance_url: Some("https://glance.example.invalid".to_string()),
                default_flavor_id: None,
                default_image_id: None,
                default_network_id: None,
                default_key_name: None,
            },
        )
    }

    #[test]
    fn normalizes_transitional_statuses_as_active() {
        let p = provider();
        assert_eq!(p.normalize_status("ACTIVE"), InstanceStatus::Active);
        assert_eq!(p.normalize_status("REBOOT"), InstanceStatus::Active);
        assert_eq!(p.normalize_status("BUILD"), InstanceStatus::Building);
        assert_eq!(p.normalize_status("ERROR"), InstanceStatus::Error);
        assert_eq!(p.normalize_status("PAUSED"), InstanceStatus::Shutoff);
        assert_eq!(p.normalize_status("DELETED"), InstanceStatus::Deleted);
        assert_eq!(p.normalize_status("WEIRD"), InstanceStatus::Building);
    }

    #[test]
    fn extracts_first_ipv4_address() {
        let p = provider();
        let data = json!({
            "addresses": {
                "private-net": [
                    { "version": 6, "addr": "fd00::1" },
                    { "version": 4, "addr": "10.0.0.12" },
                ]
            }
        });
        assert_eq!(p.extract_ip_address(&data), Some("10.0.0.12".to_string()));
    }

    #[test]
    fn catalog_endpoint_prefers_public_interface() {
        let catalog = json!([
            {
                "type": "compute",
                "endpoints": [
                    { "interface": "internal", "url": "https://internal.invalid" },
                    { "interface": "public", "url": "https://public.invalid" },
                ]
            }
        ]);
        let catalog = catalog.as_array().unwrap();
        assert_eq!(catalog_endpoint(catalog, "compute"), Some("https://public.invalid".to_string()));
        assert_eq!(catalog_endpoint(catalog, "network"), None);
    }

    #[tokio::test]
    async fn create_instance_authenticates_against_keystone_then_calls_nova() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(ResponseTemplate::new(201).insert_header("X-Subject-Token", "scoped-token").set_body_json(json!({
                "token": { "catalog": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(header("X-Auth-Token", "scoped-token"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "server": { "id": "abc-123", "status": "BUILD" }
            })))
            .mount(&server)
            .await;

        let p = OpenStackProvider::new(
            Client::new(),
            OpenStackConfig {
                auth_url: format!("{}/v3", server.uri()),
                auth_method: OpenStackAuthMethod::ApplicationCredential { id: "id".to_string(), secret: "secret".to_string() },
                nova_url: Some(server.uri()),
                neutron_url: Some(server.uri()),
                glance_url: Some(server.uri()),
                default_flavor_id: None,
                default_image_id: None,
                default_network_id: None,
                default_key_name: None,
            },
        );

        let instance = p
            .create_instance(CreateInstanceRequest {
                name: "box-1".to_string(),
                size: "m1.small".to_string(),
                image: "ubuntu".to_string(),
                region: None,
                network: None,
                key_name: None,
                user_data: None,
            })
            .await
            .expect("create_instance");

        assert_eq!(instance.provider_instance_id, "abc-123");
        assert_eq!(instance.raw_status, "BUILD");
    }

    #[tokio::test]
    async fn missing_catalog_endpoint_without_an_override_is_not_configured() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(ResponseTemplate::new(201).insert_header("X-Subject-Token", "scoped-token").set_body_json(json!({
                "token": { "catalog": [] }
            })))
            .mount(&server)
            .await;

        let p = OpenStackProvider::new(
            Client::new(),
            OpenStackConfig {
                auth_url: format!("{}/v3", server.uri()),
                auth_method: OpenStackAuthMethod::ApplicationCredential { id: "id".to_string(), secret: "secret".to_string() },
                nova_url: None,
                neutron_url: None,
                glance_url: None,
                default_flavor_id: None,
                default_image_id: None,
                default_network_id: None,
                default_key_name: None,
            },
        );

        let err = p.authenticate().await.unwrap_err();
        assert!(matches!(err, CloudError::NotConfigured(_)));
    }
}
