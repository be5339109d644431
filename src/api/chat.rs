use super::state::ApiState;
use super::{bearer_token, clamp_limit, ApiError};
use crate::error::PipelineError;
use crate::pipeline::ChatRequest;
use crate::safety::RiskTier;
use crate::ChildId;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatSendRequest {
    child_id: String,
    message: String,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatSendResponse {
    message_id: String,
    reply: String,
    risk_tier: RiskTier,
    timestamp: String,
}

pub(super) async fn send(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<ChatSendRequest>,
) -> Result<Json<ChatSendResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let session = state.sessions.authenticate(token).await?;

    let child_id: ChildId = Arc::from(request.child_id.as_str());
    let reply = state
        .pipeline
        .handle(
            &session,
            ChatRequest {
                child_id,
                message: request.message,
                message_id: request.message_id,
            },
        )
        .await?;

    Ok(Json(ChatSendResponse {
        message_id: reply.message_id,
        reply: reply.reply,
        risk_tier: reply.risk_tier,
        timestamp: reply.timestamp.to_rfc3339(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatHistoryQuery {
    child_id: String,
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatHistoryMessage {
    id: String,
    role: String,
    content: String,
    risk_tier: RiskTier,
    created_at: String,
}

pub(super) async fn history(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<Json<Vec<ChatHistoryMessage>>, ApiError> {
    let token = bearer_token(&headers)?;
    let session = state.sessions.authenticate(token).await?;

    let child_id: ChildId = Arc::from(query.child_id.as_str());
    if !session.can_access(&child_id) {
        return Err(PipelineError::Unauthorized("session is not bound to this child".into()).into());
    }
    // Ownership check: the guardian-scoped fetch 404s on anyone else's child.
    state
        .resolver
        .fetch_child(&child_id, &session.guardian_id)
        .await?;

    let messages = state
        .conversations
        .load_recent(&child_id, clamp_limit(query.limit))
        .await?;

    Ok(Json(
        messages
            .into_iter()
            .map(|m| ChatHistoryMessage {
                id: m.id,
                role: m.role,
                content: m.content,
                risk_tier: m.risk_tier,
                created_at: m.created_at.to_rfc3339(),
            })
            .collect(),
    ))
}
