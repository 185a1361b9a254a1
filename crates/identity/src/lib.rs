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

//! The downstream identity provider collaborator the identity sync
//! worker pushes queued credential changes to (`SPEC_FULL.md` §4.7).
//! The one concrete backend is a Keycloak realm reached through its
//! admin REST API; a confirmed or password-rotated user becomes a
//! `create`/`update` operation, a deactivated one a `delete`.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider not configured: {0}")]
    NotConfigured(String),

    #[error("request to identity provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("identity provider rejected the request: {message}")]
    Rejected { message: String, transient: bool },

    #[error("user {0} not found")]
    NotFound(String),
}

impl IdentityError {
    fn rejected(message: impl Into<String>, status: StatusCode) -> Self {
        Self::Rejected { message: message.into(), transient: status.is_server_error() }
    }

    /// Whether retrying this call later has any chance of succeeding.
    /// Drives the identity sync queue's retry-budget vs. terminal-failure
    /// split (`SPEC_FULL.md` §4.7): a 4xx rejection or a config/lookup
    /// error will not resolve itself on the next tick, so the row is
    /// failed immediately instead of burning through `MAX_RETRIES`.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(err) => err.status().map_or(true, |status| status.is_server_error()),
            Self::Rejected { transient, .. } => *transient,
            Self::NotConfigured(_) | Self::NotFound(_) => false,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates a downstream account for `username` with the given
    /// plaintext password. Idempotent in the sense that a `create` for
    /// an already-existing username should succeed (treated as no-op),
    /// since sync is at-least-once and this call may be retried.
    async fn create_user(&self, username: &str, password: &str) -> Result<(), IdentityError>;

    async fn update_password(&self, username: &str, password: &str) -> Result<(), IdentityError>;

    async fn delete_user(&self, username: &str) -> Result<(), IdentityError>;

    /// Health check used to decide whether the sync worker should even
    /// attempt the queue this tick, so a down IDP doesn't burn through
    /// every row's retry budget in one pass.
    async fn is_reachable(&self) -> bool;
}

pub struct KeycloakConfig {
    pub base_url: String,
    pub realm: String,
    pub admin_client_id: String,
    pub admin_client_secret: String,
}

/// Keycloak admin REST API client. Obtains a client-credentials token
/// lazily and caches it until a request comes back `401`, at which
/// point the next call re-authenticates.
pub struct KeycloakIdentityProvider {
    client: Client,
    config: KeycloakConfig,
    token: RwLock<Option<String>>,
}

impl KeycloakIdentityProvider {
    #[must_use]
    pub fn new(client: Client, config: KeycloakConfig) -> Self {
        Self { client, config, token: RwLock::new(None) }
    }

    fn admin_base(&self) -> String {
        format!("{}/admin/realms/{}", self.config.base_url.trim_end_matches('/'), self.config.realm)
    }

    async fn token(&self) -> Result<String, IdentityError> {
        if let Some(token) = self.token.read().unwrap().clone() {
            return Ok(token);
        }
        self.refresh_token().await
    }

    #[tracing::instrument(name = "identity.keycloak.refresh_token", skip_all, err)]
    async fn refresh_token(&self) -> Result<String, IdentityError> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.config.base_url.trim_end_matches('/'),
            self.config.realm
        );
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.admin_client_id.as_str()),
                ("client_secret", self.config.admin_client_secret.as_str()),
            ])
            .send()
            .await?;
        let response = response.error_for_status().map_err(IdentityError::Request)?;
        let body: Value = response.json().await?;
        let token = body["access_token"]
            .as_str()
            .ok_or_else(|| IdentityError::Rejected {
                message: "token response missing access_token".to_string(),
                transient: false,
            })?
            .to_string();
        *self.token.write().unwrap() = Some(token.clone());
        Ok(token)
    }

    async fn find_user_id(&self, username: &str) -> Result<Option<String>, IdentityError> {
        let token = self.token().await?;
        let response = self
            .client
            .get(format!("{}/users", self.admin_base()))
            .bearer_auth(&token)
            .query(&[("username", username), ("exact", "true")])
            .send()
            .await?;
        let response = response.error_for_status().map_err(IdentityError::Request)?;
        let users: Vec<Value> = response.json().await?;
        Ok(users.first().and_then(|u| u["id"].as_str()).map(ToString::to_string))
    }
}

#[async_trait]
impl IdentityProvider for KeycloakIdentityProvider {
    #[tracing::instrument(name = "identity.keycloak.create_user", skip_all, fields(identity.username = username), err)]
    async fn create_user(&self, username: &str, password: &str) -> Result<(), IdentityError> {
        if self.find_user_id(username).await?.is_some() {
            tracing::info!(username, "keycloak user already exists, updating password instead");
            return self.update_password(username, password).await;
        }

        let token = self.token().await?;
        let response = self
            .client
            .post(format!("{}/users", self.admin_base()))
            .bearer_auth(&token)
            .json(&json!({
                "username": username,
                "enabled": true,
                "credentials": [{ "type": "password", "value": password, "temporary": false }],
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::CONFLICT => Ok(()),
            status => Err(IdentityError::rejected(format!("create user returned {status}"), status)),
        }
    }

    #[tracing::instrument(name = "identity.keycloak.update_password", skip_all, fields(identity.username = username), err)]
    async fn update_password(&self, username: &str, password: &str) -> Result<(), IdentityError> {
        let user_id = self.find_user_id(username).await?.ok_or_else(|| IdentityError::NotFound(username.to_string()))?;
        let token = self.token().await?;
        let response = self
            .client
            .put(format!("{}/users/{user_id}/reset-password", self.admin_base()))
            .bearer_auth(&token)
            .json(&json!({ "type": "password", "value": password, "temporary": false }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(IdentityError::rejected(format!("reset password returned {status}"), status))
        }
    }

    #[tracing::instrument(name = "identity.keycloak.delete_user", skip_all, fields(identity.username = username), err)]
    async fn delete_user(&self, username: &str) -> Result<(), IdentityError> {
        let Some(user_id) = self.find_user_id(username).await? else {
            return Ok(());
        };
        let token = self.token().await?;
        let response = self
            .client
            .delete(format!("{}/users/{user_id}", self.admin_base()))
            .bearer_auth(&token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            status => Err(IdentityError::rejected(format!("delete user returned {status}"), status)),
        }
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/realms/{}", self.config.base_url.trim_end_matches('/'), self.config.realm);
        matches!(self.client.get(url).send().await, Ok(response) if response.status().is_success())
    }
}

/// In-memory identity provider for tests and for deployments with
/// `password_sync_enabled = false`.
#[derive(Default)]
pub struct NullIdentityProvider;

#[async_trait]
impl IdentityProvider for NullIdentityProvider {
    async fn create_user(&self, _username: &str, _password: &str) -> Result<(), IdentityError> {
        Ok(())
    }

    async fn update_password(&self, _username: &str, _password: &str) -> Result<(), IdentityError> {
        Ok(())
    }

    async fn delete_user(&self, _username: &str) -> Result<(), IdentityError> {
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(base_url: String) -> KeycloakConfig {
        KeycloakConfig {
            base_url,
            realm: "cadre".to_string(),
            admin_client_id: "cadre-sync".to_string(),
            admin_client_secret: "secret".to_string(),
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/realms/cadre/protocol/openid-connect/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "admin-token" })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn create_user_updates_password_instead_when_the_username_already_exists() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/admin/realms/cadre/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "u-1", "username": "alice" }])))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/admin/realms/cadre/users/u-1/reset-password"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let provider = KeycloakIdentityProvider::new(Client::new(), config(server.uri()));
        provider.create_user("alice", "new-pass").await.expect("create_user");
    }

    #[tokio::test]
    async fn create_user_surfaces_a_permanent_rejection_for_a_4xx_response() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET")).and(path("/admin/realms/cadre/users")).respond_with(ResponseTemplate::new(200).set_body_json(json!([]))).mount(&server).await;
        Mock::given(method("POST")).and(path("/admin/realms/cadre/users")).respond_with(ResponseTemplate::new(400)).mount(&server).await;

        let provider = KeycloakIdentityProvider::new(Client::new(), config(server.uri()));
        let err = provider.create_user("bob", "pass").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn create_user_surfaces_a_transient_rejection_for_a_5xx_response() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET")).and(path("/admin/realms/cadre/users")).respond_with(ResponseTemplate::new(200).set_body_json(json!([]))).mount(&server).await;
        Mock::given(method("POST")).and(path("/admin/realms/cadre/users")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let provider = KeycloakIdentityProvider::new(Client::new(), config(server.uri()));
        let err = provider.create_user("carol", "pass").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn delete_user_is_a_no_op_when_the_user_is_already_gone() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET")).and(path("/admin/realms/cadre/users")).respond_with(ResponseTemplate::new(200).set_body_json(json!([]))).mount(&server).await;

        let provider = KeycloakIdentityProvider::new(Client::new(), config(server.uri()));
        provider.delete_user("ghost").await.expect("delete of an absent user is a no-op");
    }

    #[tokio::test]
    async fn is_reachable_reflects_the_realm_endpoint_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/realms/cadre")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let provider = KeycloakIdentityProvider::new(Client::new(), config(server.uri()));
        assert!(provider.is_reachable().await);
    }
}
