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

//! `GET /cloud-init/vpn-config` (`SPEC_FULL.md` §6): a freshly provisioned
//! instance presents its single-use config-fetch token and gets back a
//! WireGuard `.conf` rendered verbatim from the assigned credential's
//! stored fields.

use axum::extract::State;
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use cadre_clock::Clock;
use cadre_storage::{InstanceRepository, VpnCredentialRepository};
use cadre_storage_pg::{PgInstanceRepository, PgVpnCredentialRepository};

use crate::{error::RouteError, state::AppState};

pub async fn vpn_config(State(state): State<AppState>, TypedHeader(auth): TypedHeader<Authorization<Bearer>>) -> Result<String, RouteError> {
    let token_hash = cadre_crypto::hash_token(auth.token());

    let mut tx = state.pool.begin().await?;
    let instance = PgInstanceRepository::new(&mut *tx).find_by_config_token_hash(&token_hash).await?.ok_or(RouteError::Unauthorized)?;

    let expires_at = instance.config_token_expires_at.ok_or(RouteError::Unauthorized)?;
    if expires_at <= state.clock.now() {
        return Err(RouteError::Unauthorized);
    }

    let Some(user_id) = instance.assigned_to_user_id else {
        return Err(RouteError::NotFound);
    };

    let credential = PgVpnCredentialRepository::new(&mut *tx).find_assigned_to(user_id).await?.ok_or(RouteError::NotFound)?;

    PgInstanceRepository::new(&mut *tx).clear_config_token(instance.id).await?;
    tx.commit().await?;

    Ok(render_wireguard_conf(&credential))
}

fn render_wireguard_conf(credential: &cadre_data_model::VpnCredential) -> String {
    let mut addresses = Vec::new();
    addresses.extend(credential.ipv4_address.clone());
    addresses.extend(credential.ipv6_local.clone());
    addresses.extend(credential.ipv6_global.clone());

    let mut conf = String::new();
    conf.push_str("[Interface]\n");
    conf.push_str(&format!("PrivateKey = {}\n", credential.private_key));
    if !addresses.is_empty() {
        conf.push_str(&format!("Address = {}\n", addresses.join(", ")));
    }
    conf.push('\n');
    conf.push_str("[Peer]\n");
    conf.push_str(&format!("Endpoint = {}\n", credential.endpoint));
    if let Some(psk) = &credential.preshared_key {
        conf.push_str(&format!("PresharedKey = {psk}\n"));
    }
    conf.push_str("AllowedIPs = 0.0.0.0/0, ::/0\n");

    conf
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cadre_clock::{Clock, SystemClock};
    use sqlx::PgPool;
    use ulid::Ulid;

    use super::*;

    async fn seed_user(pool: &PgPool) -> Ulid {
        let user_id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO users (user_id, email, email_normalized, first_name, last_name, country)
                VALUES ($1, $2, $2, 'Test', 'User', 'US')
            "#,
            uuid::Uuid::from(user_id),
            format!("vpn-test-{user_id}@example.com"),
        )
        .execute(pool)
        .await
        .expect("seed user");
        user_id
    }

    async fn seed_credential(pool: &PgPool, user_id: Ulid) {
        sqlx::query!(
            r#"
                INSERT INTO vpn_credentials
                    (id, ipv4_address, private_key, endpoint, key_type, assigned_to_user_id, is_available)
                VALUES ($1, '10.0.0.2/32', 'privkey-contents', 'vpn.example.com:51820', 'wireguard', $2, FALSE)
            "#,
            uuid::Uuid::from(Ulid::new()),
            uuid::Uuid::from(user_id),
        )
        .execute(pool)
        .await
        .expect("seed credential");
    }

    async fn seed_instance(pool: &PgPool, user_id: Ulid, clock: &dyn Clock) -> (Ulid, String) {
        let (raw, hash) = cadre_crypto::generate_token();
        let instance_id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO instances (id, name, provider, assigned_to_user_id, config_token_hash, config_token_expires_at)
                VALUES ($1, 'test-instance', 'digitalocean', $2, $3, $4)
            "#,
            uuid::Uuid::from(instance_id),
            uuid::Uuid::from(user_id),
            hash,
            clock.now() + chrono::Duration::seconds(3600),
        )
        .execute(pool)
        .await
        .expect("seed instance");
        (instance_id, raw)
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn config_token_is_single_use(pool: PgPool) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let user_id = seed_user(&pool).await;
        seed_credential(&pool, user_id).await;
        let (_, raw_token) = seed_instance(&pool, user_id, clock.as_ref()).await;

        let state = AppState { pool: pool.clone(), clock: clock.clone(), mail_webhook_key: None };
        let auth = TypedHeader(Authorization::bearer(&raw_token).unwrap());

        let first = vpn_config(State(state.clone()), auth.clone()).await;
        assert!(first.is_ok());
        let conf = first.unwrap();
        assert!(conf.contains("PrivateKey = privkey-contents"));
        assert!(conf.contains("Endpoint = vpn.example.com:51820"));

        let second = vpn_config(State(state), auth).await;
        assert!(matches!(second, Err(RouteError::Unauthorized)));
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn unknown_token_is_rejected(pool: PgPool) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let state = AppState { pool, clock, mail_webhook_key: None };
        let auth = TypedHeader(Authorization::bearer("not-a-real-token").unwrap());

        let result = vpn_config(State(state), auth).await;
        assert!(matches!(result, Err(RouteError::Unauthorized)));
    }

    #[test]
    fn render_wireguard_conf_matches_the_expected_layout() {
        let credential = cadre_data_model::VpnCredential {
            id: Ulid::new(),
            ipv4_address: Some("10.0.0.2/32".to_string()),
            ipv6_local: None,
            ipv6_global: None,
            private_key: "privkey-contents".to_string(),
            preshared_key: Some("psk-contents".to_string()),
            endpoint: "vpn.example.com:51820".to_string(),
            key_type: "wireguard".to_string(),
            assigned_to_user_id: None,
            assigned_to_username: None,
            assigned_at: None,
            is_available: false,
            is_active: true,
        };

        let mut settings = insta::Settings::clone_current();
        settings.set_prepend_module_to_snapshot(false);
        settings.bind(|| {
            insta::assert_snapshot!("wireguard_conf", render_wireguard_conf(&credential));
        });
    }
}
