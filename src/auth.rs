//! Bearer-token session authentication.
//!
//! Sessions are minted by the account system (external) and stored in the
//! shared database. A session is either bound to a single child (the chat
//! client) or guardian-wide (the dashboard); either way it carries the
//! guardian id, which scopes every downstream query.

use crate::error::{PipelineError, Result};
use crate::{ChildId, GuardianId};

use sqlx::{Row as _, SqlitePool};
use std::sync::Arc;

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub guardian_id: GuardianId,
    /// Set for child-device sessions; `None` for guardian dashboard sessions.
    pub child_id: Option<ChildId>,
}

impl AuthSession {
    /// Whether this session may act for the given child. Guardian sessions
    /// pass here and are then ownership-checked by the guardian-scoped
    /// profile fetch.
    pub fn can_access(&self, child_id: &ChildId) -> bool {
        match &self.child_id {
            Some(bound) => bound.as_ref() == child_id.as_ref(),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve a bearer token to a live session.
    pub async fn authenticate(&self, token: &str) -> Result<AuthSession> {
        if token.is_empty() {
            return Err(PipelineError::Unauthorized("missing credential".into()));
        }

        let row = sqlx::query(
            "SELECT guardian_id, child_id FROM sessions \
             WHERE token = ? AND datetime(expires_at) > datetime(CURRENT_TIMESTAMP)",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PipelineError::Unauthorized("invalid or expired credential".into()))?;

        let guardian_id: String = row.try_get("guardian_id").unwrap_or_default();
        let child_id: Option<String> = row.try_get("child_id").ok();

        Ok(AuthSession {
            guardian_id: Arc::from(guardian_id.as_str()),
            child_id: child_id
                .filter(|id| !id.is_empty())
                .map(|id| Arc::from(id.as_str())),
        })
    }
}
