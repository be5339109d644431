//! Child profile and companion resolution.
//!
//! Profiles are created by the guardian dashboard and are read-only here.
//! The companion record is created lazily on first chat contact; creation is
//! an atomic upsert so two simultaneous first-contact requests still leave
//! exactly one row per child.

use crate::error::{PipelineError, Result};
use crate::{ChildId, GuardianId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};

pub const DEFAULT_COMPANION_NAME: &str = "Buddy";
pub const DEFAULT_COMPANION_TRAITS: &[&str] = &["friendly", "curious", "encouraging"];

/// A child's identity, owned by a guardian account.
#[derive(Debug, Clone, Serialize)]
pub struct ChildProfile {
    pub id: ChildId,
    pub guardian_id: GuardianId,
    pub display_name: String,
    pub age: i64,
    pub personality_mode: String,
}

/// One entry in a companion's rolling conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: String,
    pub summary: String,
    pub at: DateTime<Utc>,
}

/// The AI persona bound one-to-one to a child profile.
#[derive(Debug, Clone)]
pub struct Companion {
    pub id: String,
    pub child_id: ChildId,
    pub display_name: String,
    pub traits: Vec<String>,
    pub conversation_context: Vec<ContextEntry>,
    pub total_messages: i64,
    pub last_interaction_at: Option<DateTime<Utc>>,
}

/// Loads child profiles and resolves (or lazily creates) companions.
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    pool: SqlitePool,
}

impl ProfileResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a child profile, scoped to the guardian that owns it.
    pub async fn fetch_child(
        &self,
        child_id: &ChildId,
        guardian_id: &GuardianId,
    ) -> Result<ChildProfile> {
        let row = sqlx::query(
            "SELECT id, guardian_id, display_name, age, personality_mode \
             FROM child_profiles WHERE id = ? AND guardian_id = ?",
        )
        .bind(child_id.as_ref())
        .bind(guardian_id.as_ref())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("child profile {child_id}")))?;

        Ok(ChildProfile {
            id: std::sync::Arc::from(row.try_get::<String, _>("id").unwrap_or_default().as_str()),
            guardian_id: std::sync::Arc::from(
                row.try_get::<String, _>("guardian_id")
                    .unwrap_or_default()
                    .as_str(),
            ),
            display_name: row.try_get("display_name").unwrap_or_default(),
            age: row.try_get("age").unwrap_or(0),
            personality_mode: row
                .try_get("personality_mode")
                .unwrap_or_else(|_| "playful".into()),
        })
    }

    /// Fetch the companion for a child, creating it on first contact.
    ///
    /// Upsert-then-fetch: `INSERT OR IGNORE` removes the check-then-insert
    /// race entirely. Whichever concurrent request loses the insert still
    /// reads the winner's row.
    pub async fn get_or_create_companion(&self, child_id: &ChildId) -> Result<Companion> {
        let id = uuid::Uuid::new_v4().to_string();
        let traits_json = serde_json::to_string(DEFAULT_COMPANION_TRAITS)
            .map_err(|e| anyhow::anyhow!("failed to encode default traits: {e}"))?;

        sqlx::query(
            "INSERT OR IGNORE INTO companions (id, child_id, display_name, traits) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(child_id.as_ref())
        .bind(DEFAULT_COMPANION_NAME)
        .bind(&traits_json)
        .execute(&self.pool)
        .await?;

        self.fetch_companion(child_id).await
    }

    async fn fetch_companion(&self, child_id: &ChildId) -> Result<Companion> {
        let row = sqlx::query(
            "SELECT id, child_id, display_name, traits, conversation_context, \
                    total_messages, last_interaction_at \
             FROM companions WHERE child_id = ?",
        )
        .bind(child_id.as_ref())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("companion for child {child_id}")))?;

        let traits: Vec<String> = row
            .try_get::<String, _>("traits")
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let conversation_context: Vec<ContextEntry> = row
            .try_get::<String, _>("conversation_context")
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(Companion {
            id: row.try_get("id").unwrap_or_default(),
            child_id: std::sync::Arc::from(
                row.try_get::<String, _>("child_id")
                    .unwrap_or_default()
                    .as_str(),
            ),
            display_name: row.try_get("display_name").unwrap_or_default(),
            traits,
            conversation_context,
            total_messages: row.try_get("total_messages").unwrap_or(0),
            last_interaction_at: row.try_get("last_interaction_at").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use std::sync::Arc;

    async fn seed_child(pool: &SqlitePool, child_id: &str, guardian_id: &str) {
        sqlx::query(
            "INSERT INTO child_profiles (id, guardian_id, display_name, age) \
             VALUES (?, ?, 'Mia', 8)",
        )
        .bind(child_id)
        .bind(guardian_id)
        .execute(pool)
        .await
        .expect("child profile should insert");
    }

    #[tokio::test]
    async fn fetch_child_scopes_to_owning_guardian() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        seed_child(&db.pool, "child-1", "guardian-1").await;
        let resolver = ProfileResolver::new(db.pool.clone());

        let child_id: ChildId = Arc::from("child-1");
        let owner: GuardianId = Arc::from("guardian-1");
        let stranger: GuardianId = Arc::from("guardian-2");

        let profile = resolver
            .fetch_child(&child_id, &owner)
            .await
            .expect("owner should resolve the child");
        assert_eq!(profile.display_name, "Mia");

        let error = resolver
            .fetch_child(&child_id, &stranger)
            .await
            .expect_err("cross-guardian access should be NotFound");
        assert!(matches!(error, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn first_contact_creates_companion_with_defaults() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        seed_child(&db.pool, "child-1", "guardian-1").await;
        let resolver = ProfileResolver::new(db.pool.clone());
        let child_id: ChildId = Arc::from("child-1");

        let companion = resolver
            .get_or_create_companion(&child_id)
            .await
            .expect("first contact should create the companion");
        assert_eq!(companion.display_name, DEFAULT_COMPANION_NAME);
        assert_eq!(companion.traits.len(), DEFAULT_COMPANION_TRAITS.len());
        assert!(companion.conversation_context.is_empty());
        assert_eq!(companion.total_messages, 0);
    }

    #[tokio::test]
    async fn concurrent_first_contact_leaves_exactly_one_companion() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        seed_child(&db.pool, "child-1", "guardian-1").await;
        let resolver = ProfileResolver::new(db.pool.clone());
        let child_id: ChildId = Arc::from("child-1");

        let a = resolver.get_or_create_companion(&child_id);
        let b = resolver.get_or_create_companion(&child_id);
        let (first, second) = tokio::join!(a, b);
        let first = first.expect("first racer should succeed");
        let second = second.expect("second racer should succeed");
        assert_eq!(first.id, second.id, "both racers must see the same row");

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM companions WHERE child_id = 'child-1'")
                .fetch_one(&db.pool)
                .await
                .expect("count should succeed");
        assert_eq!(count.0, 1);
    }
}
