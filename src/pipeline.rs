//! The chat request handler.
//!
//! One linear state machine per request: resolve profile → assemble context
//! → classify input → (block | generate → classify output) → persist →
//! escalate → respond. Collaborators are injected so tests can substitute
//! fakes at every seam.
//!
//! Fail safe always wins over fail open: a red input never reaches the
//! generator, a red generation never reaches the child, and generation
//! failures degrade to a fixed reply instead of erroring the request.

use crate::auth::AuthSession;
use crate::context::ContextAssembler;
use crate::conversation::{ConversationStore, ExchangeHalf, MessageRole};
use crate::error::{PipelineError, Result};
use crate::escalation::EscalationReporter;
use crate::generator::ResponseGenerator;
use crate::profile::ProfileResolver;
use crate::safety::{Classification, RiskTier, SafetyClassifier};
use crate::ChildId;

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Pre-approved reply sent instead of engaging with a blocked message.
/// Never model-generated.
pub const REDIRECT_REPLY: &str = "Let's talk about something else, okay? If something is \
    bothering you, telling a grown-up you trust always helps. Want to hear a fun fact instead?";

/// Generic reply substituted when generation fails or produces unsafe text.
pub const FALLBACK_REPLY: &str = "Oops, I got my wires crossed for a second! Could you ask \
    me that again in a different way?";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub child_id: ChildId,
    pub message: String,
    /// Client-supplied idempotency id; a resubmission with the same id must
    /// not duplicate the exchange.
    pub message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message_id: String,
    pub reply: String,
    pub risk_tier: RiskTier,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ChatPipeline {
    resolver: ProfileResolver,
    assembler: ContextAssembler,
    classifier: Arc<dyn SafetyClassifier>,
    generator: Arc<dyn ResponseGenerator>,
    store: ConversationStore,
    reporter: EscalationReporter,
}

impl ChatPipeline {
    pub fn new(
        resolver: ProfileResolver,
        assembler: ContextAssembler,
        classifier: Arc<dyn SafetyClassifier>,
        generator: Arc<dyn ResponseGenerator>,
        store: ConversationStore,
        reporter: EscalationReporter,
    ) -> Self {
        Self {
            resolver,
            assembler,
            classifier,
            generator,
            store,
            reporter,
        }
    }

    /// Handle one chat exchange end to end.
    #[tracing::instrument(skip(self, session, request), fields(child_id = %request.child_id))]
    pub async fn handle(&self, session: &AuthSession, request: ChatRequest) -> Result<ChatReply> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(PipelineError::InvalidInput("message must be non-empty".into()));
        }
        if !session.can_access(&request.child_id) {
            return Err(PipelineError::Unauthorized(
                "session is not bound to this child".into(),
            ));
        }

        let child = self
            .resolver
            .fetch_child(&request.child_id, &session.guardian_id)
            .await?;
        let companion = self.resolver.get_or_create_companion(&child.id).await?;
        let context = self.assembler.assemble(&child, &companion).await?;

        self.enforce_rate_limits(&child.id, &context.policy).await?;

        let input = self.classifier.classify(message, &context.policy);
        let blocked = input.tier == RiskTier::Red
            || (input.tier == RiskTier::Yellow && context.policy.block_on_yellow);

        if blocked {
            tracing::info!(
                tier = %input.tier,
                flags = ?input.flags,
                "incoming message blocked, sending redirect"
            );
            let child_half = ExchangeHalf {
                role: MessageRole::Child,
                content: message.to_string(),
                classification: input.clone(),
            };
            let reply_half = ExchangeHalf {
                role: MessageRole::Companion,
                content: REDIRECT_REPLY.to_string(),
                classification: flagged_green("redirect", "fixed pre-approved redirect"),
            };
            let (child_row, reply_row) = self
                .store
                .append_exchange(&companion, request.message_id, &child_half, &reply_half)
                .await?;

            self.reporter
                .escalate(
                    &child,
                    &child_row.id,
                    message,
                    input.tier,
                    &input.explanation,
                    &context.policy,
                )
                .await?;

            return Ok(ChatReply {
                message_id: child_row.id,
                reply: REDIRECT_REPLY.to_string(),
                risk_tier: input.tier,
                timestamp: reply_row.created_at,
            });
        }

        // Input cleared. Generate, then classify what came back before any
        // of it can reach the child. The same blocking predicate applies on
        // the way out: red always, yellow under block_on_yellow.
        let generation = match self.generator.generate(&context, message).await {
            Ok(generated) => {
                let capped = truncate_chars(&generated, context.policy.max_response_length);
                let output = self.classifier.classify(&capped, &context.policy);
                let output_blocked = output.tier == RiskTier::Red
                    || (output.tier == RiskTier::Yellow && context.policy.block_on_yellow);
                if output_blocked {
                    Err(PipelineError::UnsafeGeneration(format!(
                        "generated reply classified {}: {}",
                        output.tier, output.explanation
                    )))
                } else {
                    Ok(ExchangeHalf {
                        role: MessageRole::Companion,
                        content: capped,
                        classification: output,
                    })
                }
            }
            Err(error) => Err(error),
        };

        let reply_half = match generation {
            Ok(half) => half,
            Err(error @ PipelineError::UnsafeGeneration(_)) => {
                // Internal fault: the model produced text the classifier
                // rejects. Discard it; the child sees only the fallback.
                tracing::error!(%error, "discarding generated reply");
                ExchangeHalf {
                    role: MessageRole::Companion,
                    content: FALLBACK_REPLY.to_string(),
                    classification: flagged_green(
                        "unsafe_generation_discarded",
                        "generated reply rejected by post-classification",
                    ),
                }
            }
            Err(error) if error.is_recoverable() => {
                tracing::warn!(%error, "generation failed, using fallback reply");
                ExchangeHalf {
                    role: MessageRole::Companion,
                    content: FALLBACK_REPLY.to_string(),
                    classification: flagged_green(
                        "generation_fallback",
                        "inference service unavailable",
                    ),
                }
            }
            Err(error) => return Err(error),
        };

        let child_half = ExchangeHalf {
            role: MessageRole::Child,
            content: message.to_string(),
            classification: input.clone(),
        };
        let (child_row, reply_row) = self
            .store
            .append_exchange(&companion, request.message_id, &child_half, &reply_half)
            .await?;

        // Final tier combines both sides of the exchange; the escalation is
        // attached to whichever message carried the risk.
        let resolved = input.tier.max(reply_half.classification.tier);
        if resolved >= RiskTier::Yellow {
            let (risky_id, risky_content, explanation) = if input.tier >= reply_half.classification.tier
            {
                (child_row.id.as_str(), message, input.explanation.as_str())
            } else {
                (
                    reply_row.id.as_str(),
                    reply_half.content.as_str(),
                    reply_half.classification.explanation.as_str(),
                )
            };
            self.reporter
                .escalate(
                    &child,
                    risky_id,
                    risky_content,
                    resolved,
                    explanation,
                    &context.policy,
                )
                .await?;
        }

        Ok(ChatReply {
            message_id: child_row.id,
            reply: reply_half.content,
            risk_tier: resolved,
            timestamp: reply_row.created_at,
        })
    }

    async fn enforce_rate_limits(
        &self,
        child_id: &ChildId,
        policy: &crate::guardrails::GuardrailSettings,
    ) -> Result<()> {
        if policy.max_messages_per_minute > 0 {
            let recent = self.store.count_child_messages_since(child_id, 60).await?;
            if recent >= policy.max_messages_per_minute {
                return Err(PipelineError::RateLimited(format!(
                    "{recent} messages in the last minute"
                )));
            }
        }
        if policy.max_messages_per_hour > 0 {
            let recent = self.store.count_child_messages_since(child_id, 3600).await?;
            if recent >= policy.max_messages_per_hour {
                return Err(PipelineError::RateLimited(format!(
                    "{recent} messages in the last hour"
                )));
            }
        }
        Ok(())
    }
}

fn flagged_green(flag: &str, explanation: &str) -> Classification {
    let mut flags = BTreeSet::new();
    flags.insert(flag.to_string());
    Classification {
        tier: RiskTier::Green,
        flags,
        explanation: explanation.to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
