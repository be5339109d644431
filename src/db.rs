//! Database connection management and embedded schema migrations.

use crate::error::Result;

use anyhow::Context as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Shared SQLite pool for all pipeline state.
///
/// WAL mode plus a busy timeout so concurrent handler instances on the same
/// file don't trip over each other's short write transactions.
#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Connect to (or create) the database file and run the embedded schema.
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir: {}", data_dir.display()))?;

        let db_path = data_dir.join("buddybot.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("invalid db path: {}", db_path.display()))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| "failed to connect to SQLite")?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database with the full schema, for tests.
    ///
    /// Capped at one connection: each `sqlite::memory:` connection is its
    /// own database, so a wider pool would hand callers empty schemas.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .with_context(|| "failed to connect to in-memory SQLite")?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Embedded raw-SQL schema rather than sqlx::migrate! so in-memory test
    /// pools get the exact same tables as the on-disk database.
    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::raw_sql(SCHEMA_V1).execute(pool).await?;
        Ok(())
    }

    /// Close the pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS child_profiles (
    id TEXT PRIMARY KEY,
    guardian_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    age INTEGER NOT NULL,
    personality_mode TEXT NOT NULL DEFAULT 'playful',
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS companions (
    id TEXT PRIMARY KEY,
    child_id TEXT NOT NULL UNIQUE REFERENCES child_profiles(id),
    display_name TEXT NOT NULL,
    traits TEXT NOT NULL DEFAULT '[]',
    conversation_context TEXT NOT NULL DEFAULT '[]',
    total_messages INTEGER NOT NULL DEFAULT 0,
    last_interaction_at TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    companion_id TEXT NOT NULL REFERENCES companions(id),
    child_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('child', 'companion')),
    content TEXT NOT NULL,
    risk_tier TEXT NOT NULL CHECK (risk_tier IN ('green', 'yellow', 'red')),
    risk_flags TEXT NOT NULL DEFAULT '[]',
    risk_explanation TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_messages_child_created
    ON messages(child_id, created_at);

CREATE TABLE IF NOT EXISTS guardrail_settings (
    child_id TEXT PRIMARY KEY REFERENCES child_profiles(id),
    strictness TEXT NOT NULL DEFAULT 'medium',
    block_on_yellow INTEGER NOT NULL DEFAULT 0,
    require_explicit_approval INTEGER NOT NULL DEFAULT 0,
    auto_expand_topics INTEGER NOT NULL DEFAULT 1,
    notify_on_yellow INTEGER NOT NULL DEFAULT 1,
    notify_on_green INTEGER NOT NULL DEFAULT 0,
    max_messages_per_minute INTEGER NOT NULL DEFAULT 10,
    max_messages_per_hour INTEGER NOT NULL DEFAULT 120,
    max_response_length INTEGER NOT NULL DEFAULT 1200,
    blocked_keywords TEXT NOT NULL DEFAULT '[]',
    allowed_phrases TEXT NOT NULL DEFAULT '[]',
    approved_topics TEXT NOT NULL DEFAULT '[]',
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS safety_reports (
    id TEXT PRIMARY KEY,
    guardian_id TEXT NOT NULL,
    child_id TEXT NOT NULL,
    message_id TEXT NOT NULL UNIQUE,
    report_type TEXT NOT NULL CHECK (report_type IN ('real_time', 'retrospective')),
    severity TEXT NOT NULL CHECK (severity IN ('yellow', 'red')),
    summary TEXT NOT NULL,
    message_excerpt TEXT NOT NULL,
    explanation TEXT NOT NULL,
    reviewed INTEGER NOT NULL DEFAULT 0,
    guardian_notes TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    reviewed_at TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_safety_reports_guardian
    ON safety_reports(guardian_id, reviewed, created_at);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    child_id TEXT NOT NULL,
    category TEXT NOT NULL CHECK (category IN ('family_fact', 'interest', 'goal', 'memory')),
    content TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_memories_child_importance
    ON memories(child_id, importance DESC);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    guardian_id TEXT NOT NULL,
    child_id TEXT,
    expires_at TIMESTAMP NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
";
