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

//! `POST /webhooks/mail` (`SPEC_FULL.md` §6): the only path by which the
//! outbound mail provider's deliverability events reach the core.
//! Authenticated by HMAC, not bearer token.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use cadre_data_model::normalize_email;
use cadre_email::webhook::{parse_events, verify_signature};
use cadre_storage::UserRepository;
use cadre_storage_pg::PgUserRepository;

use crate::{error::RouteError, state::AppState};

const SIGNATURE_HEADER: &str = "x-webhook-signature";
const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

pub async fn mail(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode, RouteError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());

    verify_signature(&body, signature, timestamp, state.mail_webhook_key.as_deref(), state.clock.now())
        .map_err(|err| RouteError::BadRequest(err.to_string()))?;

    let events = parse_events(&body).map_err(|err| RouteError::BadRequest(err.to_string()))?;

    let mut tx = state.pool.begin().await?;
    for event in events {
        let Some(status) = event.event_type.email_status() else {
            continue;
        };

        let normalized = normalize_email(&event.email);
        let mut repo = PgUserRepository::new(&mut *tx);
        let Some(user) = repo.find_by_normalized_email(&normalized).await? else {
            tracing::warn!(email = %event.email, "mail webhook event for unknown recipient");
            continue;
        };

        repo.set_email_status(user.id, status).await?;
    }
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::HeaderValue;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use cadre_clock::{Clock, SystemClock};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use sqlx::PgPool;
    use ulid::Ulid;

    use super::*;

    type HmacSha256 = Hmac<Sha256>;

    fn sign(body: &[u8], timestamp: &str, key: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(key).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    async fn seed_user(pool: &PgPool, email: &str) -> Ulid {
        let user_id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO users (user_id, email, email_normalized, first_name, last_name, country)
                VALUES ($1, $2, $2, 'Test', 'User', 'US')
            "#,
            uuid::Uuid::from(user_id),
            email,
        )
        .execute(pool)
        .await
        .expect("seed user");
        user_id
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn bounce_event_marks_matching_user_bounced(pool: PgPool) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        seed_user(&pool, "bounced@example.com").await;

        let key = b"webhook-secret";
        let state = AppState { pool: pool.clone(), clock: clock.clone(), mail_webhook_key: Some(key.to_vec()) };

        let body = br#"[{"event":"bounce","email":"bounced@example.com","timestamp":1000}]"#;
        let now = clock.now();
        let timestamp = now.timestamp().to_string();
        let sig = sign(body, &timestamp, key);

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&timestamp).unwrap());

        let response = mail(State(state), headers, Bytes::from_static(body)).await;
        assert_eq!(response.unwrap(), StatusCode::NO_CONTENT);

        let status: String = sqlx::query_scalar!(r#"SELECT email_status FROM users WHERE email_normalized = 'bounced@example.com'"#)
            .fetch_one(&pool)
            .await
            .expect("fetch status");
        assert_eq!(status, "bounced");
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn missing_signature_is_rejected_when_key_is_configured(pool: PgPool) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let state = AppState { pool, clock, mail_webhook_key: Some(b"webhook-secret".to_vec()) };

        let result = mail(State(state), HeaderMap::new(), Bytes::from_static(b"[]")).await;
        assert!(matches!(result, Err(RouteError::BadRequest(_))));
    }
}
