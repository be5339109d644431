//! HTTP API for the chat pipeline.

mod chat;
mod reports;
mod state;

pub use state::ApiState;

use crate::error::PipelineError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat::send))
        .route("/api/chat/history", get(chat::history))
        .route("/api/reports", get(reports::list))
        .route("/api/reports/review", post(reports::review))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Error body for non-2xx responses: `{error, details?}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Wrapper turning pipeline errors into HTTP responses.
pub(crate) struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, label, details) = match &self.0 {
            PipelineError::Unauthorized(details) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", Some(details.clone()))
            }
            PipelineError::NotFound(details) => {
                (StatusCode::NOT_FOUND, "not_found", Some(details.clone()))
            }
            PipelineError::InvalidInput(details) => {
                (StatusCode::BAD_REQUEST, "invalid_input", Some(details.clone()))
            }
            PipelineError::RateLimited(details) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                Some(details.clone()),
            ),
            // Recoverable variants are handled inside the pipeline; reaching
            // here means a bug, so treat them as internal.
            PipelineError::GenerationFailed(_)
            | PipelineError::UnsafeGeneration(_)
            | PipelineError::PersistenceFailed(_)
            | PipelineError::Other(_) => {
                tracing::error!(error = %self.0, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorBody {
            error: label.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

/// Bound a caller-supplied page size to [1, 200]. SQLite treats a negative
/// LIMIT as "no limit", so zero and negatives must clamp up, not pass through.
pub(crate) fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 200)
}

/// Extract the bearer credential from the Authorization header.
pub(crate) fn bearer_token(headers: &axum::http::HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError(PipelineError::Unauthorized(
                "missing bearer credential".into(),
            ))
        })
}
