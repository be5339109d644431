//! Conversation persistence: append-only messages plus the companion's
//! bounded rolling context.
//!
//! The two halves of an exchange are written in one transaction: either the
//! whole exchange is recorded or none of it is. Rolling-context maintenance
//! is a pure truncation to the most recent window, done inside the same
//! transaction.

use crate::error::{PipelineError, Result};
use crate::profile::{Companion, ContextEntry};
use crate::safety::{Classification, RiskTier};
use crate::ChildId;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row as _, SqlitePool};

/// Hard bound on rolling-context entries per companion.
pub const CONTEXT_WINDOW: usize = 20;

/// How much of a message makes it into a rolling-context summary.
const SUMMARY_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Child,
    Companion,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Child => "child",
            MessageRole::Companion => "companion",
        }
    }
}

/// A persisted message row. Append-only, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub companion_id: String,
    pub child_id: String,
    pub role: String,
    pub content: String,
    pub risk_tier: RiskTier,
    pub risk_flags: Vec<String>,
    pub risk_explanation: String,
    pub created_at: DateTime<Utc>,
}

/// One half of an exchange, ready to persist.
#[derive(Debug, Clone)]
pub struct ExchangeHalf {
    pub role: MessageRole,
    pub content: String,
    pub classification: Classification,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a child/companion exchange atomically and roll the companion's
    /// context window forward.
    ///
    /// `child_message_id` may be supplied by the caller for retry idempotency;
    /// replaying an id that already exists re-reads the stored pair instead
    /// of writing duplicates. The companion reply id is derived from the
    /// child id so the pair stays stable across retries.
    pub async fn append_exchange(
        &self,
        companion: &Companion,
        child_message_id: Option<String>,
        child_half: &ExchangeHalf,
        companion_half: &ExchangeHalf,
    ) -> Result<(StoredMessage, StoredMessage)> {
        let child_msg_id = child_message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let reply_id = format!("{child_msg_id}-reply");

        let mut tx = self.pool.begin().await?;

        let inserted = insert_message(&mut tx, &child_msg_id, companion, child_half).await?;
        if inserted == 0 {
            // Retried request: the exchange is already on disk.
            tx.rollback().await?;
            let child_row = self.fetch_message(&child_msg_id).await?;
            let reply_row = self.fetch_message(&reply_id).await?;
            return Ok((child_row, reply_row));
        }
        insert_message(&mut tx, &reply_id, companion, companion_half).await?;

        let mut context = companion.conversation_context.clone();
        context.push(summarize(child_half));
        context.push(summarize(companion_half));
        if context.len() > CONTEXT_WINDOW {
            context.drain(..context.len() - CONTEXT_WINDOW);
        }
        let context_json = serde_json::to_string(&context)
            .map_err(|e| anyhow::anyhow!("failed to encode rolling context: {e}"))?;

        sqlx::query(
            "UPDATE companions \
             SET conversation_context = ?, \
                 total_messages = total_messages + 2, \
                 last_interaction_at = CURRENT_TIMESTAMP \
             WHERE id = ?",
        )
        .bind(&context_json)
        .bind(&companion.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let child_row = self.fetch_message(&child_msg_id).await?;
        let reply_row = self.fetch_message(&reply_id).await?;
        Ok((child_row, reply_row))
    }

    /// Load recent messages for a child (oldest first).
    pub async fn load_recent(&self, child_id: &ChildId, limit: i64) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, companion_id, child_id, role, content, risk_tier, risk_flags, \
                    risk_explanation, created_at \
             FROM messages WHERE child_id = ? \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?",
        )
        .bind(child_id.as_ref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows.into_iter().map(decode_message).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Count child-authored messages in a trailing window, for rate limiting.
    /// Counting persisted rows keeps the limit correct across concurrent
    /// handler instances.
    pub async fn count_child_messages_since(
        &self,
        child_id: &ChildId,
        window_secs: i64,
    ) -> Result<i64> {
        let modifier = format!("-{} seconds", window_secs.max(0));
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM messages \
             WHERE child_id = ? AND role = 'child' \
               AND datetime(created_at) >= datetime(CURRENT_TIMESTAMP, ?)",
        )
        .bind(child_id.as_ref())
        .bind(modifier)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n").unwrap_or(0))
    }

    async fn fetch_message(&self, message_id: &str) -> Result<StoredMessage> {
        let row = sqlx::query(
            "SELECT id, companion_id, child_id, role, content, risk_tier, risk_flags, \
                    risk_explanation, created_at \
             FROM messages WHERE id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("message {message_id}")))?;
        Ok(decode_message(row))
    }
}

async fn insert_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    message_id: &str,
    companion: &Companion,
    half: &ExchangeHalf,
) -> Result<u64> {
    let flags: Vec<&str> = half.classification.flags.iter().map(String::as_str).collect();
    let flags_json = serde_json::to_string(&flags)
        .map_err(|e| anyhow::anyhow!("failed to encode risk flags: {e}"))?;

    let result = sqlx::query(
        "INSERT OR IGNORE INTO messages \
            (id, companion_id, child_id, role, content, risk_tier, risk_flags, risk_explanation) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(&companion.id)
    .bind(companion.child_id.as_ref())
    .bind(half.role.as_str())
    .bind(&half.content)
    .bind(half.classification.tier.as_str())
    .bind(&flags_json)
    .bind(&half.classification.explanation)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

fn summarize(half: &ExchangeHalf) -> ContextEntry {
    let summary = match half.content.char_indices().nth(SUMMARY_MAX_CHARS) {
        Some((byte_index, _)) => half.content[..byte_index].to_string(),
        None => half.content.clone(),
    };
    ContextEntry {
        role: half.role.as_str().to_string(),
        summary,
        at: Utc::now(),
    }
}

fn decode_message(row: sqlx::sqlite::SqliteRow) -> StoredMessage {
    let tier: String = row.try_get("risk_tier").unwrap_or_default();
    let flags: Vec<String> = row
        .try_get::<String, _>("risk_flags")
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    StoredMessage {
        id: row.try_get("id").unwrap_or_default(),
        companion_id: row.try_get("companion_id").unwrap_or_default(),
        child_id: row.try_get("child_id").unwrap_or_default(),
        role: row.try_get("role").unwrap_or_default(),
        content: row.try_get("content").unwrap_or_default(),
        // Unparseable tiers read back as red: fail safe, never fail open.
        risk_tier: RiskTier::parse(&tier).unwrap_or(RiskTier::Red),
        risk_flags: flags,
        risk_explanation: row.try_get("risk_explanation").unwrap_or_default(),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}
