//! The shared agent contract.
//!
//! Defined here so the coordinator and agent crates can reference it without
//! circular dependencies. Agent-specific behavior lives behind this trait;
//! variants are configurations of the same contract, not an inheritance chain.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::event::ChatTurn;
use crate::Result;

/// A lazy, finite, non-restartable sequence of response text chunks.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// The agent variants the orchestrator can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Conversational,
    Knowledge,
    Memory,
    Graph,
    Study,
}

/// A fact injected from core memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreHint {
    pub key: String,
    pub value: String,
}

/// A snippet surfaced by recall search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHint {
    pub content: String,
    pub similarity: f32,
}

/// Memory context assembled by the orchestrator before generation.
///
/// Retrieval failures degrade to an empty `MemoryHints`, never to an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryHints {
    pub core: Vec<CoreHint>,
    pub recall: Vec<RecallHint>,
}

impl MemoryHints {
    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.recall.is_empty()
    }

    /// Number of distinct sources contributing to this context.
    pub fn sources_count(&self) -> usize {
        self.core.len() + self.recall.len()
    }
}

/// Static configuration of one agent variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Agent ID, unique within the registry.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Sampling temperature for this variant.
    pub temperature: f32,

    /// Output token cap.
    pub max_tokens: u32,

    /// Instruction lines prepended to the system prompt.
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, temperature: f32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            temperature,
            max_tokens: 2048,
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The core agent trait every variant implements.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's unique identifier.
    fn id(&self) -> &str;

    /// Which variant this agent is.
    fn kind(&self) -> AgentKind;

    /// The agent's static profile.
    fn profile(&self) -> &AgentProfile;

    /// Generate a streamed response for a message with conversation context
    /// and memory hints. The returned stream is consumed exactly once.
    async fn process(
        &self,
        message: &str,
        context: &[ChatTurn],
        hints: &MemoryHints,
    ) -> Result<ChunkStream>;

    /// Bring the agent up. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Shut the agent down. Idempotent.
    async fn stop(&self) -> Result<()>;
}
