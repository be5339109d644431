//! Adapter to the external inference service.
//!
//! The service is opaque, possibly slow, and possibly failing. The adapter
//! bounds it with a fixed client timeout and at most one retry, and maps
//! every failure mode (timeout, transport error, empty output) to
//! `GenerationFailed` so the handler can substitute a safe static reply.

use crate::config::GeneratorConfig;
use crate::context::AssembledContext;
use crate::error::{PipelineError, Result};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// The generation seam. Only ever reached with input already cleared by the
/// classifier.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, context: &AssembledContext, message: &str) -> Result<String>;
}

/// Chat-completions-shaped HTTP adapter.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl HttpGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn attempt(&self, system_prompt: &str, message: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": message },
            ],
        });

        let mut request = self.client.post(&self.base_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::GenerationFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::GenerationFailed(format!(
                "inference service returned {status}"
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::GenerationFailed(format!("malformed response: {e}")))?;

        let reply = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if reply.trim().is_empty() {
            return Err(PipelineError::GenerationFailed("empty completion".into()));
        }
        Ok(reply)
    }
}

#[async_trait]
impl ResponseGenerator for HttpGenerator {
    async fn generate(&self, context: &AssembledContext, message: &str) -> Result<String> {
        let system_prompt = render_system_prompt(context);

        match self.attempt(&system_prompt, message).await {
            Ok(reply) => Ok(reply),
            Err(error) => {
                tracing::warn!(%error, "generation attempt failed, retrying once");
                self.attempt(&system_prompt, message).await
            }
        }
    }
}

/// Render the persona/context system prompt the inference service sees.
pub fn render_system_prompt(context: &AssembledContext) -> String {
    let mut prompt = format!(
        "You are {name}, an AI companion for {child}, who is {age} years old. \
         Personality mode: {mode}. Your traits: {traits}. \
         Always respond in a warm, age-appropriate way. Keep replies short.",
        name = context.companion_name,
        child = context.child_name,
        age = context.child_age,
        mode = context.personality_mode,
        traits = context.companion_traits.join(", "),
    );

    if !context.approved_topics.is_empty() {
        prompt.push_str(&format!(
            "\nStay within these guardian-approved topics: {}.",
            context.approved_topics.join(", ")
        ));
    }

    if !context.memories.is_empty() {
        prompt.push_str("\nThings you know:");
        for memory in &context.memories {
            prompt.push_str(&format!("\n- ({}) {}", memory.category, memory.content));
        }
    }

    if !context.recent_messages.is_empty() {
        prompt.push_str("\nRecent conversation:");
        for entry in &context.recent_messages {
            prompt.push_str(&format!("\n[{}] {}", entry.role, entry.summary));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::GuardrailSettings;

    fn context() -> AssembledContext {
        AssembledContext {
            child_name: "Mia".into(),
            child_age: 8,
            personality_mode: "playful".into(),
            companion_name: "Buddy".into(),
            companion_traits: vec!["friendly".into(), "curious".into()],
            approved_topics: vec!["science".into()],
            recent_messages: Vec::new(),
            memories: Vec::new(),
            policy: GuardrailSettings::default(),
        }
    }

    #[test]
    fn system_prompt_carries_persona_and_topics() {
        let prompt = render_system_prompt(&context());
        assert!(prompt.contains("You are Buddy"));
        assert!(prompt.contains("8 years old"));
        assert!(prompt.contains("friendly, curious"));
        assert!(prompt.contains("guardian-approved topics: science"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let mut ctx = context();
        ctx.approved_topics.clear();
        let prompt = render_system_prompt(&ctx);
        assert!(!prompt.contains("guardian-approved topics"));
        assert!(!prompt.contains("Things you know"));
        assert!(!prompt.contains("Recent conversation"));
    }
}
