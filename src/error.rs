//! Pipeline error taxonomy.
//!
//! Every failure the chat pipeline can surface maps onto one of these
//! variants. The HTTP layer translates them to status codes; anything that
//! would let unsafe content through is recovered locally in the pipeline and
//! never reaches this boundary as an error.

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Pipeline errors, in the order a request can hit them.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing, malformed, or expired credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown child, or a child the caller's session cannot access.
    #[error("not found: {0}")]
    NotFound(String),

    /// Empty message, malformed body.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The child has exceeded a guardian-configured message rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Inference service timeout, error, or empty output. Recovered into a
    /// static fallback reply by the handler, never surfaced to the caller.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// The generated reply was blocked by post-classification (red, or
    /// yellow under block_on_yellow). Recovered into a fallback reply;
    /// logged as an internal fault.
    #[error("unsafe generation rejected: {0}")]
    UnsafeGeneration(String),

    /// A store write failed. An exchange that cannot be recorded must not be
    /// presented as successful.
    #[error("persistence failed: {0}")]
    PersistenceFailed(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the handler recovers this error into a safe static reply
    /// instead of returning it to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::GenerationFailed(_) | PipelineError::UnsafeGeneration(_)
        )
    }
}
