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

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use cadre_clock::{Clock, SystemClock};
use cadre_cloud::digitalocean::{DigitalOceanConfig, DigitalOceanProvider};
use cadre_cloud::openstack::{OpenStackAuthMethod, OpenStackConfig, OpenStackProvider};
use cadre_cloud::CloudProvider;
use cadre_crypto::FieldCipher;
use cadre_email::{Mailer, SmtpMailer, SmtpMailerConfig, StaticTemplateRegistry};
use cadre_identity::{IdentityProvider, KeycloakConfig, KeycloakIdentityProvider, NullIdentityProvider};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

/// Builds every collaborator from `config` and runs both the HTTP surface
/// and the background scheduler in the same process until a shutdown
/// signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new().max_connections(20).connect(&config.database_url).await?;
    cadre_storage_pg::MIGRATOR.run(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cipher = FieldCipher::from_base64(&config.field_encryption_key)?;

    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(
        SmtpMailerConfig {
            host: config.smtp.host.clone(),
            port: config.smtp.port,
            username: config.smtp.username.clone(),
            password: config.smtp.password.clone(),
            use_tls: config.smtp.use_tls,
            from_address: config.smtp.from_address.clone(),
            from_name: config.smtp.from_name.clone(),
            test_override_address: config.test_email_override_address.clone(),
        },
        Box::new(StaticTemplateRegistry),
    )?);

    let identity: Arc<dyn IdentityProvider> = match &config.identity_provider {
        Some(keycloak) if keycloak.enabled => Arc::new(KeycloakIdentityProvider::new(
            reqwest::Client::new(),
            KeycloakConfig {
                base_url: keycloak.base_url.clone(),
                realm: keycloak.realm.clone(),
                admin_client_id: keycloak.admin_client_id.clone(),
                admin_client_secret: keycloak.admin_client_secret.clone(),
            },
        )),
        _ => Arc::new(NullIdentityProvider),
    };

    let mut cloud_providers: HashMap<String, Arc<dyn CloudProvider>> = HashMap::new();
    if let Some(do_config) = &config.cloud_providers.digitalocean {
        let provider = DigitalOceanProvider::new(
            reqwest::Client::new(),
            DigitalOceanConfig {
                api_token: do_config.api_token.clone(),
                default_region: do_config.default_region.clone(),
                default_size: do_config.default_size.clone(),
                ssh_key_id: do_config.ssh_key_id.clone(),
                api_base: None,
            },
        );
        cloud_providers.insert(provider.name().to_string(), Arc::new(provider));
    }
    if let Some(os_config) = &config.cloud_providers.openstack {
        let provider = OpenStackProvider::new(
            reqwest::Client::new(),
            OpenStackConfig {
                auth_url: os_config.auth_url.clone(),
                auth_method: OpenStackAuthMethod::ApplicationCredential {
                    id: os_config.application_credential.id.clone(),
                    secret: os_config.application_credential.secret.clone(),
                },
                nova_url: os_config.nova_url.clone(),
                neutron_url: os_config.neutron_url.clone(),
                glance_url: os_config.glance_url.clone(),
                default_flavor_id: os_config.default_flavor_id.clone(),
                default_image_id: os_config.default_image_id.clone(),
                default_network_id: os_config.default_network_id.clone(),
                default_key_name: os_config.default_key_name.clone(),
            },
        );
        cloud_providers.insert(provider.name().to_string(), Arc::new(provider));
    }

    let task_state = Arc::new(cadre_tasks::State {
        pool: pool.clone(),
        clock: clock.clone(),
        mailer,
        identity,
        cipher,
        cloud_providers,
        config: config.scheduler_config(),
    });

    let scheduler = cadre_tasks::init(task_state);
    scheduler.start();

    let mail_webhook_key = config.mail_webhook_key.as_ref().map(|key| key.clone().into_bytes());
    let app_state = cadre_handlers::AppState { pool, clock, mail_webhook_key };
    let router = cadre_handlers::router(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
