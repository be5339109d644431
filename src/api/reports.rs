use super::state::ApiState;
use super::{bearer_token, clamp_limit, ApiError};
use crate::error::PipelineError;
use crate::escalation::SafetyReport;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub(super) struct ReportsQuery {
    #[serde(default = "default_reports_limit")]
    limit: i64,
}

fn default_reports_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub(super) struct ReportsResponse {
    reports: Vec<SafetyReport>,
}

/// Guardian-only: list safety reports, unreviewed first.
pub(super) async fn list(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<ReportsQuery>,
) -> Result<Json<ReportsResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let session = state.sessions.authenticate(token).await?;
    require_guardian_session(&session)?;

    let reports = state
        .reporter
        .list_for_guardian(&session.guardian_id, clamp_limit(query.limit))
        .await?;
    Ok(Json(ReportsResponse { reports }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReviewRequest {
    report_id: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ReviewResponse {
    ok: bool,
}

/// Guardian-only: mark a report reviewed with optional notes.
pub(super) async fn review(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let session = state.sessions.authenticate(token).await?;
    require_guardian_session(&session)?;

    state
        .reporter
        .mark_reviewed(
            &request.report_id,
            &session.guardian_id,
            request.notes.as_deref(),
        )
        .await?;
    Ok(Json(ReviewResponse { ok: true }))
}

/// Child-device sessions must never see escalation data.
fn require_guardian_session(session: &crate::auth::AuthSession) -> Result<(), ApiError> {
    if session.child_id.is_some() {
        return Err(
            PipelineError::Unauthorized("guardian session required".into()).into(),
        );
    }
    Ok(())
}
