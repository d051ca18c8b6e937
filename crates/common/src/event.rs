//! Inbound events and the reply sink contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A message pushed by the chat-platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Opaque stable identity of the author.
    pub author_id: String,

    /// Channel the message arrived on.
    pub channel_id: String,

    /// Whether the message arrived in a direct-message channel.
    pub is_dm: bool,

    /// Raw message text.
    pub text: String,

    /// Whether the author is a bot (including ourselves).
    pub is_bot: bool,
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One turn of conversation history handed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Downstream consumer of a streamed reply.
///
/// `send_chunk` is awaited per chunk, which is how backpressure from the
/// transport reaches the generating agent.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_chunk(&self, chunk: &str) -> Result<()>;

    /// Signal the end of the reply. Called exactly once per pipeline run,
    /// including error paths.
    async fn finish(&self) -> Result<()>;
}
