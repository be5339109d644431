//! Shared state handed to every API handler.

use crate::auth::SessionStore;
use crate::conversation::ConversationStore;
use crate::escalation::EscalationReporter;
use crate::pipeline::ChatPipeline;
use crate::profile::ProfileResolver;

pub struct ApiState {
    pub sessions: SessionStore,
    pub pipeline: ChatPipeline,
    pub resolver: ProfileResolver,
    pub conversations: ConversationStore,
    pub reporter: EscalationReporter,
}
