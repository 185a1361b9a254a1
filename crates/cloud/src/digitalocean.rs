//! DigitalOcean Droplet API backend.

use async_trait::async_trait;
use cadre_data_model::InstanceStatus;
use reqwest::Client;
use serde_json::{json, Value};

use crate::{CloudError, CloudProvider, CreateInstanceRequest, ProviderInstance};

const DEFAULT_API_BASE: &str = "https://api.digitalocean.com/v2";

pub struct DigitalOceanConfig {
    pub api_token: Option<String>,
    pub default_region: String,
    pub default_size: String,
    pub ssh_key_id: Option<String>,
    /// Overrides the DigitalOcean API origin. `None` in every real
    /// deployment; set by tests to point the client at a stub server.
    pub api_base: Option<String>,
}

pub struct DigitalOceanProvider {
    client: Client,
    config: DigitalOceanConfig,
}

impl DigitalOceanProvider {
    #[must_use]
    pub fn new(client: Client, config: DigitalOceanConfig) -> Self {
        Self { client, config }
    }

    fn base(&self) -> &str {
        self.config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn token(&self) -> Result<&str, CloudError> {
        self.config
            .api_token
            .as_deref()
            .ok_or_else(|| CloudError::NotConfigured("DO_API_TOKEN is not set".to_string()))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, CloudError> {
        Ok(builder.bearer_auth(self.token()?))
    }
}

#[async_trait]
impl CloudProvider for DigitalOceanProvider {
    fn name(&self) -> &'static str {
        "digitalocean"
    }

    #[tracing::instrument(name = "cloud.digitalocean.authenticate", skip_all, err)]
    async fn authenticate(&self) -> Result<(), CloudError> {
        let response = self
            .authed(self.client.get(format!("{}/account", self.base())))?
            .send()
            .await?;
        response.error_for_status_ref().map_err(CloudError::Request)?;
        Ok(())
    }

    #[tracing::instrument(name = "cloud.digitalocean.create_instance", skip_all, fields(instance.name = %request.name), err)]
    async fn create_instance(&self, request: CreateInstanceRequest) -> Result<ProviderInstance, CloudError> {
        let region = request.region.unwrap_or_else(|| self.config.default_region.clone());
        let size = if request.size.is_empty() { self.config.default_size.clone() } else { request.size };
        let ssh_key = request.key_name.or_else(|| self.config.ssh_key_id.clone());

        if ssh_key.is_none() {
            tracing::warn!("no SSH key configured for DigitalOcean droplet, password authentication will be enabled");
        }

        let mut body = json!({
            "name": request.name,
            "region": region,
            "size": size,
            "image": request.image,
            "backups": false,
            "ipv6": false,
            "monitoring": true,
        });
        if let Some(key) = ssh_key {
            body["ssh_keys"] = json!([key]);
        }
        if let Some(user_data) = request.user_data {
            body["user_data"] = json!(user_data);
        }

        let response = self
            .authed(self.client.post(format!("{}/droplets", self.base())).json(&body))?
            .send()
            .await?;
        let response = response.error_for_status().map_err(CloudError::Request)?;
        let data: Value = response.json().await?;
        let droplet = data
            .get("droplet")
            .ok_or_else(|| CloudError::UnexpectedResponse(data.to_string()))?
            .clone();

        let id = droplet
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| CloudError::UnexpectedResponse("droplet response missing id".to_string()))?;
        let raw_status = droplet.get("status").and_then(Value::as_str).unwrap_or("new").to_string();
        let ip_address = self.extract_ip_address(&droplet);

        Ok(ProviderInstance {
            provider_instance_id: id.to_string(),
            raw_status,
            ip_address,
            raw: droplet,
        })
    }

    #[tracing::instrument(name = "cloud.digitalocean.delete_instance", skip_all, fields(instance.provider_id = provider_instance_id), err)]
    async fn delete_instance(&self, provider_instance_id: &str) -> Result<(), CloudError> {
        let response = self
            .authed(self.client.delete(format!("{}/droplets/{provider_instance_id}", self.base())))?
            .send()
            .await?;
        match response.status().as_u16() {
            204 | 404 => Ok(()),
            _ => Err(CloudError::UnexpectedResponse(format!(
                "delete droplet {provider_instance_id} returned {}",
                response.status()
            ))),
        }
    }

    #[tracing::instrument(name = "cloud.digitalocean.get_instance_status", skip_all, fields(instance.provider_id = provider_instance_id), err)]
    async fn get_instance_status(&self, provider_instance_id: &str) -> Result<Option<ProviderInstance>, CloudError> {
        let response = self
            .authed(self.client.get(format!("{}/droplets/{provider_instance_id}", self.base())))?
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(CloudError::Request)?;
        let data: Value = response.json().await?;
        let Some(droplet) = data.get("droplet").cloned() else {
            return Ok(None);
        };
        let raw_status = droplet.get("status").and_then(Value::as_str).unwrap_or("").to_string();
        let ip_address = self.extract_ip_address(&droplet);
        Ok(Some(ProviderInstance {
            provider_instance_id: provider_instance_id.to_string(),
            raw_status,
            ip_address,
            raw: droplet,
        }))
    }

    async fn list_sizes(&self) -> Result<Vec<Value>, CloudError> {
        list_field(self, "sizes", format!("{}/sizes", self.base())).await
    }

    async fn list_images(&self) -> Result<Vec<Value>, CloudError> {
        list_field(self, "images", format!("{}/images?type=distribution", self.base())).await
    }

    async fn list_regions_or_networks(&self) -> Result<Vec<Value>, CloudError> {
        list_field(self, "regions", format!("{}/regions", self.base())).await
    }

    fn normalize_status(&self, provider_status: &str) -> InstanceStatus {
        match provider_status.to_lowercase().as_str() {
            "new" => InstanceStatus::Building,
            "active" => InstanceStatus::Active,
            "off" => InstanceStatus::Shutoff,
            "archive" => InstanceStatus::Deleted,
            _ => InstanceStatus::Building,
        }
    }

    fn extract_ip_address(&self, raw: &Value) -> Option<String> {
        raw.get("networks")?
            .get("v4")?
            .as_array()?
            .iter()
            .find(|network| network.get("type").and_then(Value::as_str) == Some("public"))
            .and_then(|network| network.get("ip_address"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }
}

async fn list_field(provider: &DigitalOceanProvider, field: &str, url: String) -> Result<Vec<Value>, CloudError> {
    let response = provider.authed(provider.client.get(url))?.send().await?;
    let response = response.error_for_status().map_err(CloudError::Request)?;
    let data: Value = response.json().await?;
    Ok(data.get(field).and_then(Value::as_array).cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> DigitalOceanProvider {
        DigitalOceanProvider::new(
            Client::new(),
            DigitalOceanConfig {
                api_token: Some("token".to_string()),
                default_region: "nyc1".to_string(),
                default_size: "s-1vcpu-1gb".to_string(),
                ssh_key_id: None,
                api_base: None,
            },
        )
    }

    fn provider_against(mock_server: &wiremock::MockServer) -> DigitalOceanProvider {
        DigitalOceanProvider::new(
            Client::new(),
            DigitalOceanConfig {
                api_token: Some("token".to_string()),
                default_region: "nyc1".to_string(),
                default_size: "s-1vcpu-1gb".to_string(),
                ssh_key_id: None,
                api_base: Some(mock_server.uri()),
            },
        )
    }

    #[test]
    fn normalizes_known_statuses() {
        let p = provider();
        assert_eq!(p.normalize_status("active"), InstanceStatus::Active);
        assert_eq!(p.normalize_status("new"), InstanceStatus::Building);
        assert_eq!(p.normalize_status("off"), InstanceStatus::Shutoff);
        assert_eq!(p.normalize_status("archive"), InstanceStatus::Deleted);
        assert_eq!(p.normalize_status("unknown"), InstanceStatus::Building);
    }

    #[test]
    fn extracts_public_ipv4() {
        let p = provider();
        let data = json!({
            "networks": {
                "v4": [
                    {"type": "private", "ip_address": "10.0.0.5"},
                    {"type": "public", "ip_address": "203.0.113.9"},
                ]
            }
        });
        assert_eq!(p.extract_ip_address(&data), Some("203.0.113.9".to_string()));
    }

    #[test]
    fn missing_token_is_not_configured() {
        let p = DigitalOceanProvider::new(
            Client::new(),
            DigitalOceanConfig {
                api_token: None,
                default_region: "nyc1".to_string(),
                default_size: "s-1vcpu-1gb".to_string(),
                ssh_key_id: None,
                api_base: None,
            },
        );
        assert!(matches!(p.token(), Err(CloudError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn create_instance_parses_the_droplet_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/droplets"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "droplet": {
                    "id": 123,
                    "status": "new",
                    "networks": { "v4": [{"type": "public", "ip_address": "198.51.100.7"}] },
                }
            })))
            .mount(&server)
            .await;

        let p = provider_against(&server);
        let instance = p
            .create_instance(CreateInstanceRequest {
                name: "box-1".to_string(),
                size: String::new(),
                image: "ubuntu-22-04-x64".to_string(),
                region: None,
                network: None,
                key_name: None,
                user_data: None,
            })
            .await
            .expect("create_instance");

        assert_eq!(instance.provider_instance_id, "123");
        assert_eq!(instance.raw_status, "new");
        assert_eq!(instance.ip_address, Some("198.51.100.7".to_string()));
    }

    #[tokio::test]
    async fn get_instance_status_returns_none_on_404() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/droplets/999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let p = provider_against(&server);
        assert_eq!(p.get_instance_status("999").await.expect("get_instance_status"), None);
    }

    #[tokio::test]
    async fn delete_instance_treats_404_as_already_gone() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("DELETE")).and(path("/droplets/42")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let p = provider_against(&server);
        p.delete_instance("42").await.expect("delete_instance should tolerate 404");
    }
}
