//! buddybot: the buddy-chat message pipeline.
//!
//! Accepts a child's chat message, assembles a bounded context, runs safety
//! classification before and after generation, persists the exchange, and
//! escalates to the guardian when risk is detected. Blocking always wins
//! over leaking unsafe content.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod conversation;
pub mod db;
pub mod error;
pub mod escalation;
pub mod generator;
pub mod guardrails;
pub mod memory;
pub mod pipeline;
pub mod profile;
pub mod safety;

use std::sync::Arc;

pub type ChildId = Arc<str>;
pub type GuardianId = Arc<str>;

pub use error::{PipelineError, Result};
pub use safety::RiskTier;
