//! Context message model.
//!
//! Message content is either a plain string or a list of multimodal parts;
//! token accounting and reduction handle both.

use serde::{Deserialize, Serialize};

use murmur_common::ChatRole;

/// One part of a multimodal message. Only `text` parts carry countable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentPart {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text view, used for summaries and persistence.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// One message in a live session. Sequence numbers are strictly increasing
/// per session and survive reductions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ChatRole,
    pub content: MessageContent,
    pub seq: u64,
}

/// Reduction algorithm selected when a session exceeds its token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMode {
    /// Keep the most recent messages that fit, preserving order.
    Full,
    /// Keep all messages but collapse whitespace in text parts.
    Compact,
    /// Preserve system messages plus the newest conversation that fits.
    Summary,
}
