//! Long-term memory entries about a child.
//!
//! Written by the dashboard and by retrospective jobs (external); the
//! pipeline only reads them, importance-ranked, to ground generation.

use crate::error::Result;
use crate::ChildId;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row as _, SqlitePool};

/// A single remembered fact about a child.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub id: String,
    pub category: String,
    pub content: String,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
}

/// Read-only importance-ranked recall.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Top-K memories for a child, highest importance first. Ties break on
    /// recency so fresh memories surface ahead of stale ones.
    pub async fn recall_top(&self, child_id: &ChildId, k: i64) -> Result<Vec<MemoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, category, content, importance, created_at \
             FROM memories WHERE child_id = ? \
             ORDER BY importance DESC, created_at DESC \
             LIMIT ?",
        )
        .bind(child_id.as_ref())
        .bind(k)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MemoryEntry {
                id: row.try_get("id").unwrap_or_default(),
                category: row.try_get("category").unwrap_or_default(),
                content: row.try_get("content").unwrap_or_default(),
                importance: row.try_get("importance").unwrap_or(0.0),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use std::sync::Arc;

    #[tokio::test]
    async fn recall_ranks_by_importance_and_respects_k() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        for (id, content, importance) in [
            ("m1", "has a dog named Rex", 0.9),
            ("m2", "likes dinosaurs", 0.7),
            ("m3", "afraid of thunderstorms", 0.95),
            ("m4", "favorite color is green", 0.2),
        ] {
            sqlx::query(
                "INSERT INTO memories (id, child_id, category, content, importance) \
                 VALUES (?, 'child-1', 'memory', ?, ?)",
            )
            .bind(id)
            .bind(content)
            .bind(importance)
            .execute(&db.pool)
            .await
            .expect("memory should insert");
        }

        let store = MemoryStore::new(db.pool.clone());
        let child_id: ChildId = Arc::from("child-1");
        let top = store
            .recall_top(&child_id, 2)
            .await
            .expect("recall should succeed");

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, "m3");
        assert_eq!(top[1].id, "m1");
    }

    #[tokio::test]
    async fn recall_never_crosses_children() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        sqlx::query(
            "INSERT INTO memories (id, child_id, category, content, importance) \
             VALUES ('other', 'child-2', 'memory', 'private fact', 1.0)",
        )
        .execute(&db.pool)
        .await
        .expect("memory should insert");

        let store = MemoryStore::new(db.pool.clone());
        let child_id: ChildId = Arc::from("child-1");
        let recalled = store
            .recall_top(&child_id, 10)
            .await
            .expect("recall should succeed");
        assert!(recalled.is_empty());
    }
}
