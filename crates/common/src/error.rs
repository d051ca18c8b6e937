//! Error types for Murmur.
//!
//! Every component maps its failures into one of these variants so callers
//! can branch on kind: transient store/LLM/embedding errors are retried with
//! backoff, conflicts and authorization failures surface immediately, and
//! cooperative cancellation is never treated as a failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum MurmurError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store conflict: {0}")]
    StoreConflict(String),

    #[error("Embedding error ({kind:?}, model={model}, text_len={text_len}): {message}")]
    Embedding {
        kind: FailureKind,
        model: String,
        text_len: usize,
        message: String,
    },

    #[error("LLM error ({kind:?}): {message}")]
    Llm { kind: FailureKind, message: String },

    #[error("Rate limited, retry in {retry_in_ms} ms")]
    RateLimited { retry_in_ms: u64 },

    #[error("Memory error ({tier}): {message}")]
    Memory {
        tier: String,
        key: Option<String>,
        message: String,
    },

    #[error("Graph error: {message}")]
    Graph {
        entity: Option<String>,
        message: String,
    },

    #[error("Context error (session {session_id}): {message}")]
    Context { session_id: String, message: String },

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MurmurError {
    pub fn memory(tier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Memory {
            tier: tier.into(),
            key: None,
            message: message.into(),
        }
    }

    pub fn memory_key(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Memory {
            tier: tier.into(),
            key: Some(key.into()),
            message: message.into(),
        }
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph {
            entity: None,
            message: message.into(),
        }
    }

    pub fn graph_entity(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Graph {
            entity: Some(entity.into()),
            message: message.into(),
        }
    }

    pub fn context(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Context {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    pub fn llm_transient(message: impl Into<String>) -> Self {
        Self::Llm {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn llm_permanent(message: impl Into<String>) -> Self {
        Self::Llm {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// True when a caller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::Embedding { kind, .. } | Self::Llm { kind, .. } => {
                *kind == FailureKind::Transient
            }
            _ => false,
        }
    }

    /// True when the failure is cooperative cancellation rather than an error.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Llm { kind, .. } => *kind == FailureKind::Cancelled,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;
