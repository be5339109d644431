//! Per-child moderation policy, configured by the guardian dashboard.
//!
//! The pipeline only ever reads these rows. A child without a stored row gets
//! the built-in defaults; a row that fails to *load* is fatal, because
//! proceeding without policy would amount to "no restrictions".

use crate::ChildId;
use crate::error::Result;

use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};

/// Moderation strictness. Affects how borderline signals are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Low,
    Medium,
    High,
}

impl Strictness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strictness::Low => "low",
            Strictness::Medium => "medium",
            Strictness::High => "high",
        }
    }

    /// Parse from the stored column value, defaulting to medium on anything
    /// unrecognized so a bad dashboard write can only make policy stricter
    /// than intended, never looser than medium.
    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Strictness::Low,
            "high" => Strictness::High,
            _ => Strictness::Medium,
        }
    }
}

/// Per-child guardrail policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailSettings {
    pub strictness: Strictness,
    pub block_on_yellow: bool,
    pub require_explicit_approval: bool,
    pub auto_expand_topics: bool,
    pub notify_on_yellow: bool,
    pub notify_on_green: bool,
    pub max_messages_per_minute: i64,
    pub max_messages_per_hour: i64,
    pub max_response_length: usize,
    pub blocked_keywords: Vec<String>,
    pub allowed_phrases: Vec<String>,
    pub approved_topics: Vec<String>,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        GuardrailSettings {
            strictness: Strictness::Medium,
            block_on_yellow: false,
            require_explicit_approval: false,
            auto_expand_topics: true,
            notify_on_yellow: true,
            notify_on_green: false,
            max_messages_per_minute: 10,
            max_messages_per_hour: 120,
            max_response_length: 1200,
            blocked_keywords: Vec::new(),
            allowed_phrases: Vec::new(),
            approved_topics: Vec::new(),
        }
    }
}

/// Read-only access to stored guardrail rows.
#[derive(Debug, Clone)]
pub struct GuardrailStore {
    pool: SqlitePool,
}

impl GuardrailStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the policy for a child. Missing row falls back to defaults; a
    /// failing read propagates as `PersistenceFailed`.
    pub async fn load(&self, child_id: &ChildId) -> Result<GuardrailSettings> {
        let row = sqlx::query(
            "SELECT strictness, block_on_yellow, require_explicit_approval, auto_expand_topics, \
                    notify_on_yellow, notify_on_green, max_messages_per_minute, \
                    max_messages_per_hour, max_response_length, blocked_keywords, \
                    allowed_phrases, approved_topics \
             FROM guardrail_settings WHERE child_id = ?",
        )
        .bind(child_id.as_ref())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(GuardrailSettings::default());
        };

        let strictness: String = row.try_get("strictness").unwrap_or_default();
        let defaults = GuardrailSettings::default();

        Ok(GuardrailSettings {
            strictness: Strictness::parse(&strictness),
            block_on_yellow: row.try_get("block_on_yellow").unwrap_or(false),
            require_explicit_approval: row.try_get("require_explicit_approval").unwrap_or(false),
            auto_expand_topics: row.try_get("auto_expand_topics").unwrap_or(true),
            notify_on_yellow: row.try_get("notify_on_yellow").unwrap_or(true),
            notify_on_green: row.try_get("notify_on_green").unwrap_or(false),
            max_messages_per_minute: row
                .try_get("max_messages_per_minute")
                .unwrap_or(defaults.max_messages_per_minute),
            max_messages_per_hour: row
                .try_get("max_messages_per_hour")
                .unwrap_or(defaults.max_messages_per_hour),
            max_response_length: row
                .try_get::<i64, _>("max_response_length")
                .map(|n| n.max(0) as usize)
                .unwrap_or(defaults.max_response_length),
            blocked_keywords: decode_string_list(row.try_get("blocked_keywords").ok()),
            allowed_phrases: decode_string_list(row.try_get("allowed_phrases").ok()),
            approved_topics: decode_string_list(row.try_get("approved_topics").ok()),
        })
    }
}

/// Decode a JSON string-array column, tolerating NULL and malformed values.
fn decode_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use std::sync::Arc;

    #[test]
    fn unrecognized_strictness_never_parses_looser_than_medium() {
        assert_eq!(Strictness::parse("paranoid"), Strictness::Medium);
        assert_eq!(Strictness::parse(""), Strictness::Medium);
        assert_eq!(Strictness::parse("low"), Strictness::Low);
        assert_eq!(Strictness::parse("high"), Strictness::High);
    }

    #[tokio::test]
    async fn missing_row_falls_back_to_defaults() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        let store = GuardrailStore::new(db.pool.clone());
        let child_id: ChildId = Arc::from("child-none");

        let policy = store.load(&child_id).await.expect("load should succeed");
        assert_eq!(policy.strictness, Strictness::Medium);
        assert!(policy.notify_on_yellow);
        assert!(policy.blocked_keywords.is_empty());
    }

    #[tokio::test]
    async fn stored_row_round_trips() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        sqlx::query(
            "INSERT INTO child_profiles (id, guardian_id, display_name, age) \
             VALUES ('child-1', 'guardian-1', 'Mia', 8)",
        )
        .execute(&db.pool)
        .await
        .expect("child profile should insert");
        sqlx::query(
            "INSERT INTO guardrail_settings \
                (child_id, strictness, block_on_yellow, notify_on_yellow, \
                 max_messages_per_minute, blocked_keywords, allowed_phrases) \
             VALUES (?, 'high', 1, 0, 3, ?, ?)",
        )
        .bind("child-1")
        .bind(r#"["scary"]"#)
        .bind(r#"["firefighter"]"#)
        .execute(&db.pool)
        .await
        .expect("insert should succeed");

        let store = GuardrailStore::new(db.pool.clone());
        let child_id: ChildId = Arc::from("child-1");
        let policy = store.load(&child_id).await.expect("load should succeed");

        assert_eq!(policy.strictness, Strictness::High);
        assert!(policy.block_on_yellow);
        assert!(!policy.notify_on_yellow);
        assert_eq!(policy.max_messages_per_minute, 3);
        assert_eq!(policy.blocked_keywords, vec!["scary".to_string()]);
        assert_eq!(policy.allowed_phrases, vec!["firefighter".to_string()]);
    }
}
