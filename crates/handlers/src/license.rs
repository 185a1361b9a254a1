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

//! `GET /license/blob`, `POST /license/queue/{acquire,release}`
//! (`SPEC_FULL.md` §6, §4.8). Blob fetch consumes the bearer token;
//! acquire/release only resolve it to a product, since it was already
//! consumed by the blob fetch and now just authorizes the caller.

use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use cadre_data_model::LicenseSlotResult;
use cadre_storage::LicenseTokenRepository;
use cadre_storage_pg::PgLicenseTokenRepository;
use cadre_tasks::license;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use ulid::Ulid;

use crate::{error::RouteError, state::AppState};

pub async fn blob(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<String, RouteError> {
    let blob = license::validate_and_consume_license_token(&state.pool, state.clock.as_ref(), auth.token(), &addr.ip().to_string(), None).await?;
    Ok(blob)
}

/// Resolves a bearer token already consumed by [`blob`] to the product id
/// it authorizes, without mutating it further.
async fn authorize_product(state: &AppState, raw_token: &str) -> Result<Ulid, RouteError> {
    let hash = cadre_crypto::hash_token(raw_token);
    let mut conn = state.pool.acquire().await?;
    let token = PgLicenseTokenRepository::new(&mut conn).find_by_hash(&hash).await?.ok_or(RouteError::Unauthorized)?;
    if !token.used || token.is_expired(state.clock.now()) {
        return Err(RouteError::Unauthorized);
    }
    Ok(token.product_id)
}

#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub hostname: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcquireResponse {
    Granted { slot_id: String },
    Wait { retry_after_seconds: u32, active: i64, max_concurrent: i32 },
}

pub async fn acquire(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<AcquireRequest>,
) -> Result<Json<AcquireResponse>, RouteError> {
    let product_id = authorize_product(&state, auth.token()).await?;

    let outcome = license::acquire_slot(&state.pool, state.clock.as_ref(), product_id, &request.hostname, &addr.ip().to_string()).await?;

    Ok(Json(match outcome {
        license::SlotAcquireResult::Granted { slot_id } => AcquireResponse::Granted { slot_id },
        license::SlotAcquireResult::Wait { retry_after_seconds, active, max_concurrent } => {
            AcquireResponse::Wait { retry_after_seconds, active, max_concurrent }
        }
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub slot_id: String,
    pub result: ReleaseResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseResult {
    Success,
    Error,
    Unknown,
}

impl From<ReleaseResult> for LicenseSlotResult {
    fn from(r: ReleaseResult) -> Self {
        match r {
            ReleaseResult::Success => Self::Success,
            ReleaseResult::Error => Self::Error,
            ReleaseResult::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub released: bool,
}

pub async fn release(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>, RouteError> {
    let product_id = authorize_product(&state, auth.token()).await?;

    let released = license::release_slot(&state.pool, state.clock.as_ref(), product_id, &request.slot_id, request.result.into()).await?;

    Ok(Json(ReleaseResponse { released }))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum_extra::headers::authorization::Bearer;
    use cadre_clock::{Clock, SystemClock};
    use sqlx::PgPool;
    use ulid::Ulid;

    use super::*;

    fn seed_client_addr() -> ConnectInfo<SocketAddr> {
        ConnectInfo("127.0.0.1:9999".parse().unwrap())
    }

    async fn seed_product(pool: &PgPool, max_concurrent: i32) -> Ulid {
        let product_id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO license_products (id, name, license_blob, max_concurrent, slot_ttl_seconds, token_ttl_seconds)
                VALUES ($1, $2, 'blob-contents', $3, 7200, 7200)
            "#,
            uuid::Uuid::from(product_id),
            format!("product-{product_id}"),
            max_concurrent,
        )
        .execute(pool)
        .await
        .expect("seed product");
        product_id
    }

    async fn seed_token(pool: &PgPool, product_id: Ulid, clock: &dyn Clock) -> String {
        let (raw, hash) = cadre_crypto::generate_token();
        sqlx::query!(
            r#"INSERT INTO license_tokens (id, token_hash, product_id, expires_at) VALUES ($1, $2, $3, $4)"#,
            uuid::Uuid::from(Ulid::new()),
            hash,
            uuid::Uuid::from(product_id),
            clock.now() + chrono::Duration::seconds(7200),
        )
        .execute(pool)
        .await
        .expect("seed token");
        raw
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn blob_is_single_use(pool: PgPool) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let product_id = seed_product(&pool, 1).await;
        let raw_token = seed_token(&pool, product_id, clock.as_ref()).await;

        let state = AppState { pool: pool.clone(), clock: clock.clone(), mail_webhook_key: None };
        let auth = TypedHeader(Authorization::bearer(&raw_token).unwrap());

        let first = blob(State(state.clone()), seed_client_addr(), auth.clone()).await;
        assert!(first.is_ok());
        assert_eq!(first.unwrap(), "blob-contents");

        let second = blob(State(state), seed_client_addr(), auth).await;
        assert!(matches!(second, Err(RouteError::Task(cadre_tasks::TaskError::TokenInvalid))));
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn acquire_reports_wait_once_capacity_is_exhausted(pool: PgPool) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let product_id = seed_product(&pool, 1).await;
        let raw_token = seed_token(&pool, product_id, clock.as_ref()).await;

        let state = AppState { pool: pool.clone(), clock: clock.clone(), mail_webhook_key: None };
        let auth = TypedHeader(Authorization::bearer(&raw_token).unwrap());

        blob(State(state.clone()), seed_client_addr(), auth.clone()).await.expect("blob consumes token");

        let first = acquire(State(state.clone()), seed_client_addr(), auth.clone(), Json(AcquireRequest { hostname: "host-a".to_string() }))
            .await
            .expect("first acquire");
        assert!(matches!(first.0, AcquireResponse::Granted { .. }));

        let second = acquire(State(state), seed_client_addr(), auth, Json(AcquireRequest { hostname: "host-b".to_string() }))
            .await
            .expect("second acquire");
        assert!(matches!(second.0, AcquireResponse::Wait { max_concurrent: 1, .. }));
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn release_is_idempotent(pool: PgPool) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let product_id = seed_product(&pool, 1).await;
        let raw_token = seed_token(&pool, product_id, clock.as_ref()).await;

        let state = AppState { pool: pool.clone(), clock: clock.clone(), mail_webhook_key: None };
        let auth = TypedHeader(Authorization::bearer(&raw_token).unwrap());

        blob(State(state.clone()), seed_client_addr(), auth.clone()).await.expect("blob consumes token");
        let granted =
            acquire(State(state.clone()), seed_client_addr(), auth.clone(), Json(AcquireRequest { hostname: "host-a".to_string() }))
                .await
                .expect("acquire");
        let slot_id = match granted.0 {
            AcquireResponse::Granted { slot_id } => slot_id,
            AcquireResponse::Wait { .. } => panic!("expected a granted slot"),
        };

        let first = release(State(state.clone()), auth.clone(), Json(ReleaseRequest { slot_id: slot_id.clone(), result: ReleaseResult::Success }))
            .await
            .expect("first release");
        assert!(first.released);

        let second = release(State(state), auth, Json(ReleaseRequest { slot_id, result: ReleaseResult::Success }))
            .await
            .expect("second release");
        assert!(!second.released);
    }
}
