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

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Maps every failure the token-authenticated endpoints can produce onto
/// the status codes named in `SPEC_FULL.md` §6/§7. Deliberately coarse:
/// callers match on the handful of cases that matter and let everything
/// else fall through to 500.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Task(#[from] cadre_tasks::TaskError),

    #[error(transparent)]
    Repository(#[from] cadre_storage::RepositoryError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Task(cadre_tasks::TaskError::TokenInvalid) => StatusCode::UNAUTHORIZED,
            Self::Task(cadre_tasks::TaskError::NotFound) => StatusCode::NOT_FOUND,
            Self::Task(cadre_tasks::TaskError::ProductInactive) => StatusCode::FORBIDDEN,
            Self::Repository(cadre_storage::RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            Self::Repository(cadre_storage::RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "unhandled route error");
        }

        // Neutral message on auth failures: no enumeration of why a token
        // was rejected (`SPEC_FULL.md` §7).
        let message = match status {
            StatusCode::UNAUTHORIZED => "invalid or expired token".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR => "internal error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
