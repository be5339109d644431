//! Bounded per-request context assembly.
//!
//! Everything the generator and classifier need for one exchange, gathered
//! into a single object: child identity, companion persona, the rolling
//! history window, top-K memories, and the active guardrail policy.
//!
//! Optional sub-sources (memories) degrade gracefully; the policy load does
//! not, because a missing policy must never be read as "no restrictions".

use crate::error::Result;
use crate::guardrails::{GuardrailSettings, GuardrailStore};
use crate::memory::{MemoryEntry, MemoryStore};
use crate::profile::{ChildProfile, Companion, ContextEntry};

/// How many memories the assembler pulls, highest importance first.
pub const MEMORY_TOP_K: i64 = 8;

/// All state relevant to one exchange. The history window is a hard bound
/// inherited from the conversation store, re-enforced here so inference
/// payloads stay predictable even if a stored row is oversized.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub child_name: String,
    pub child_age: i64,
    pub personality_mode: String,
    pub companion_name: String,
    pub companion_traits: Vec<String>,
    pub approved_topics: Vec<String>,
    pub recent_messages: Vec<ContextEntry>,
    pub memories: Vec<MemoryEntry>,
    pub policy: GuardrailSettings,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    guardrails: GuardrailStore,
    memories: MemoryStore,
}

impl ContextAssembler {
    pub fn new(guardrails: GuardrailStore, memories: MemoryStore) -> Self {
        Self { guardrails, memories }
    }

    pub async fn assemble(
        &self,
        child: &ChildProfile,
        companion: &Companion,
    ) -> Result<AssembledContext> {
        // Policy is mandatory. A failed read propagates and fails the request.
        let policy = self.guardrails.load(&child.id).await?;

        // Memory recall is optional. Proceed without it on failure.
        let memories = match self.memories.recall_top(&child.id, MEMORY_TOP_K).await {
            Ok(memories) => memories,
            Err(error) => {
                tracing::warn!(%error, child_id = %child.id, "memory recall failed, continuing without memories");
                Vec::new()
            }
        };

        let mut recent_messages = companion.conversation_context.clone();
        let window = crate::conversation::CONTEXT_WINDOW;
        if recent_messages.len() > window {
            recent_messages.drain(..recent_messages.len() - window);
        }

        Ok(AssembledContext {
            child_name: child.display_name.clone(),
            child_age: child.age,
            personality_mode: child.personality_mode.clone(),
            companion_name: companion.display_name.clone(),
            companion_traits: companion.traits.clone(),
            approved_topics: policy.approved_topics.clone(),
            recent_messages,
            memories,
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::profile::ProfileResolver;
    use crate::ChildId;
    use std::sync::Arc;

    #[tokio::test]
    async fn assembles_policy_history_and_memories() {
        let db = Db::connect_in_memory().await.expect("db should connect");
        sqlx::query(
            "INSERT INTO child_profiles (id, guardian_id, display_name, age) \
             VALUES ('child-1', 'guardian-1', 'Mia', 8)",
        )
        .execute(&db.pool)
        .await
        .expect("child should insert");
        sqlx::query(
            "INSERT INTO memories (id, child_id, category, content, importance) \
             VALUES ('m1', 'child-1', 'interest', 'loves dinosaurs', 0.8)",
        )
        .execute(&db.pool)
        .await
        .expect("memory should insert");
        sqlx::query(
            "INSERT INTO guardrail_settings (child_id, approved_topics) \
             VALUES ('child-1', '[\"science\",\"animals\"]')",
        )
        .execute(&db.pool)
        .await
        .expect("settings should insert");

        let resolver = ProfileResolver::new(db.pool.clone());
        let child_id: ChildId = Arc::from("child-1");
        let guardian_id = Arc::from("guardian-1");
        let child = resolver
            .fetch_child(&child_id, &guardian_id)
            .await
            .expect("child should resolve");
        let companion = resolver
            .get_or_create_companion(&child_id)
            .await
            .expect("companion should create");

        let assembler = ContextAssembler::new(
            crate::guardrails::GuardrailStore::new(db.pool.clone()),
            MemoryStore::new(db.pool.clone()),
        );
        let context = assembler
            .assemble(&child, &companion)
            .await
            .expect("assembly should succeed");

        assert_eq!(context.child_age, 8);
        assert_eq!(context.companion_name, "Buddy");
        assert_eq!(context.approved_topics, vec!["science", "animals"]);
        assert_eq!(context.memories.len(), 1);
        assert!(context.recent_messages.is_empty());
    }
}
