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

//! The token-authenticated JSON surface (`SPEC_FULL.md` §6): everything a
//! freshly provisioned instance calls back into, plus the inbound mail
//! webhook. No browser-facing HTML lives here.

mod cloud_init;
pub mod error;
mod license;
mod state;
mod webhooks;

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use state::AppState;

/// Builds the full router. The caller supplies `into_make_service_with_connect_info::<SocketAddr>()`
/// at serve time since `/license/queue/acquire` records the caller's IP.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cloud-init/vpn-config", get(cloud_init::vpn_config))
        .route("/license/blob", get(license::blob))
        .route("/license/queue/acquire", post(license::acquire))
        .route("/license/queue/release", post(license::release))
        .route("/webhooks/mail", post(webhooks::mail))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
