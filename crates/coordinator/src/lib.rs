//! Message orchestration for Murmur.
//!
//! Triage (intent classification), agent selection, memory enrichment, and
//! the per-message state machine that carries an inbound event from
//! classification through streamed generation to transactional persistence.

pub mod orchestrator;
pub mod routing;
pub mod triage;

pub use orchestrator::{
    ApprovalStatus, HandleOutcome, MessageState, Orchestrator, OrchestratorStats,
};
pub use routing::{canned_reply, help_reply, AgentRegistry};
pub use triage::{IntentCategory, IntentClassifier, IntentEntities, IntentResult};
