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

use std::sync::Arc;

use cadre_clock::Clock;
use sqlx::PgPool;

/// Shared state for the token-authenticated HTTP surface. Intentionally
/// narrow: this crate exposes only the endpoints named in `SPEC_FULL.md`
/// §6, so it needs none of the session/template/policy machinery a
/// browser-facing surface would.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub clock: Arc<dyn Clock>,
    /// HMAC key verifying `POST /webhooks/mail`. `None` only in
    /// development — production deployments must configure one.
    pub mail_webhook_key: Option<Vec<u8>>,
}
