//! Typed configuration populated from environment variables.
//!
//! All recognized options have explicit defaults and are validated
//! exhaustively at startup; a bad value is a fatal `ConfigError` (exit 64),
//! never a silent fallback.

use std::str::FromStr;

use crate::{MurmurError, Result};

/// Process exit codes used by the binary.
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 64;
pub const EXIT_RUNTIME: i32 = 70;
pub const EXIT_UNAVAILABLE: i32 = 75;

#[derive(Debug, Clone)]
pub struct Config {
    /// Chat model name (`CHAT_MODEL`).
    pub chat_model: String,
    /// Embedding model name (`EMBEDDING_MODEL`).
    pub embedding_model: String,
    /// Embedding vector dimension (`EMBEDDING_DIM`).
    pub embedding_dim: usize,
    /// Token limit per embedding input (`EMBEDDING_MAX_TOKENS`).
    pub embedding_max_tokens: usize,
    /// Embedding cache entries (`EMBEDDING_CACHE_SIZE`).
    pub embedding_cache_size: usize,
    /// Embedding cache TTL in seconds (`EMBEDDING_CACHE_TTL_S`).
    pub embedding_cache_ttl_s: u64,

    /// Session token budget (`MAX_CONTEXT_TOKENS`).
    pub max_context_tokens: usize,
    /// Hard cap a session may never exceed even post-reduction.
    pub absolute_context_tokens: usize,
    /// Core memory entries per user (`CORE_MEMORY_MAX`).
    pub core_memory_max: usize,
    /// Idle session expiry (`SESSION_IDLE_TTL_S`).
    pub session_idle_ttl_s: u64,
    /// Offload cache capacity (`OFFLOAD_CACHE_SIZE`).
    pub offload_cache_size: usize,

    /// Global tokens per second (`RATE_LIMIT_GLOBAL`).
    pub rate_limit_global: u32,
    /// Per-channel tokens per second (`RATE_LIMIT_PER_CHANNEL`).
    pub rate_limit_per_channel: u32,

    /// Per-request deadline (`REQUEST_TIMEOUT_S`).
    pub request_timeout_s: u64,
    /// Classifier confidence floor (`INTENT_CONFIDENCE_THRESHOLD`).
    pub intent_confidence_threshold: f32,
    /// Graph search acceptance threshold, cosine similarity in [-1, 1]
    /// (`MURMUR_GRAPH_SIMILARITY_THRESHOLD`).
    pub graph_similarity_threshold: f32,

    /// Whether out-of-scope canned replies are persisted
    /// (`MURMUR_PERSIST_OUT_OF_SCOPE`).
    pub persist_out_of_scope: bool,
    /// Command prefix short-circuiting the pipeline (`MURMUR_COMMAND_PREFIX`).
    pub command_prefix: String,
    /// Approval timeout for destructive intents (`MURMUR_APPROVAL_TIMEOUT_S`).
    pub approval_timeout_s: u64,

    /// SQLite database path (`MURMUR_DB_PATH`).
    pub db_path: String,
    /// LLM provider API key (`OPENAI_API_KEY`).
    pub api_key: Option<String>,
    /// LLM provider base URL override (`MURMUR_LLM_BASE_URL`).
    pub llm_base_url: Option<String>,
    /// Salt for user-id correlation hashes (`MURMUR_HASH_SALT`).
    pub hash_salt: String,
    /// Admin surface bind address (`MURMUR_BIND_ADDR`).
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chat_model: "gpt-4o".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dim: 1536,
            embedding_max_tokens: 8191,
            embedding_cache_size: 256,
            embedding_cache_ttl_s: 300,
            max_context_tokens: 8000,
            absolute_context_tokens: 32_000,
            core_memory_max: 100,
            session_idle_ttl_s: 1800,
            offload_cache_size: 100,
            rate_limit_global: 50,
            rate_limit_per_channel: 5,
            request_timeout_s: 30,
            intent_confidence_threshold: 0.5,
            graph_similarity_threshold: 0.3,
            persist_out_of_scope: false,
            command_prefix: "!".into(),
            approval_timeout_s: 300,
            db_path: "./data/murmur.db".into(),
            api_key: None,
            llm_base_url: None,
            hash_salt: "murmur".into(),
            bind_addr: "127.0.0.1:8080".into(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MurmurError::Config(format!("{name} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(MurmurError::Config(format!(
                "{name} must be a boolean, got '{raw}'"
            ))),
        },
        Err(_) => Ok(default),
    }
}

fn string_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            chat_model: string_var("CHAT_MODEL", &defaults.chat_model),
            embedding_model: string_var("EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_dim: parse_var("EMBEDDING_DIM", defaults.embedding_dim)?,
            embedding_max_tokens: parse_var("EMBEDDING_MAX_TOKENS", defaults.embedding_max_tokens)?,
            embedding_cache_size: parse_var("EMBEDDING_CACHE_SIZE", defaults.embedding_cache_size)?,
            embedding_cache_ttl_s: parse_var(
                "EMBEDDING_CACHE_TTL_S",
                defaults.embedding_cache_ttl_s,
            )?,
            max_context_tokens: parse_var("MAX_CONTEXT_TOKENS", defaults.max_context_tokens)?,
            absolute_context_tokens: parse_var(
                "MURMUR_ABSOLUTE_CONTEXT_TOKENS",
                defaults.absolute_context_tokens,
            )?,
            core_memory_max: parse_var("CORE_MEMORY_MAX", defaults.core_memory_max)?,
            session_idle_ttl_s: parse_var("SESSION_IDLE_TTL_S", defaults.session_idle_ttl_s)?,
            offload_cache_size: parse_var("OFFLOAD_CACHE_SIZE", defaults.offload_cache_size)?,
            rate_limit_global: parse_var("RATE_LIMIT_GLOBAL", defaults.rate_limit_global)?,
            rate_limit_per_channel: parse_var(
                "RATE_LIMIT_PER_CHANNEL",
                defaults.rate_limit_per_channel,
            )?,
            request_timeout_s: parse_var("REQUEST_TIMEOUT_S", defaults.request_timeout_s)?,
            intent_confidence_threshold: parse_var(
                "INTENT_CONFIDENCE_THRESHOLD",
                defaults.intent_confidence_threshold,
            )?,
            graph_similarity_threshold: parse_var(
                "MURMUR_GRAPH_SIMILARITY_THRESHOLD",
                defaults.graph_similarity_threshold,
            )?,
            persist_out_of_scope: parse_bool(
                "MURMUR_PERSIST_OUT_OF_SCOPE",
                defaults.persist_out_of_scope,
            )?,
            command_prefix: string_var("MURMUR_COMMAND_PREFIX", &defaults.command_prefix),
            approval_timeout_s: parse_var("MURMUR_APPROVAL_TIMEOUT_S", defaults.approval_timeout_s)?,
            db_path: string_var("MURMUR_DB_PATH", &defaults.db_path),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            llm_base_url: std::env::var("MURMUR_LLM_BASE_URL").ok(),
            hash_salt: string_var("MURMUR_HASH_SALT", &defaults.hash_salt),
            bind_addr: string_var("MURMUR_BIND_ADDR", &defaults.bind_addr),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants between options. Called by `from_env`, and again
    /// by the composition root for configs assembled in tests.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(MurmurError::Config("EMBEDDING_DIM must be positive".into()));
        }
        if self.embedding_max_tokens == 0 {
            return Err(MurmurError::Config(
                "EMBEDDING_MAX_TOKENS must be positive".into(),
            ));
        }
        if self.max_context_tokens == 0 {
            return Err(MurmurError::Config(
                "MAX_CONTEXT_TOKENS must be positive".into(),
            ));
        }
        if self.absolute_context_tokens < self.max_context_tokens {
            return Err(MurmurError::Config(
                "absolute context cap must be >= MAX_CONTEXT_TOKENS".into(),
            ));
        }
        if self.core_memory_max == 0 {
            return Err(MurmurError::Config("CORE_MEMORY_MAX must be positive".into()));
        }
        if self.rate_limit_global == 0 || self.rate_limit_per_channel == 0 {
            return Err(MurmurError::Config(
                "rate limits must be positive tokens per second".into(),
            ));
        }
        if self.request_timeout_s == 0 {
            return Err(MurmurError::Config(
                "REQUEST_TIMEOUT_S must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.intent_confidence_threshold) {
            return Err(MurmurError::Config(
                "INTENT_CONFIDENCE_THRESHOLD must be within [0, 1]".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.graph_similarity_threshold) {
            return Err(MurmurError::Config(
                "graph similarity threshold must be within [-1, 1]".into(),
            ));
        }
        if self.chat_model.is_empty() || self.embedding_model.is_empty() {
            return Err(MurmurError::Config("model names cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_dimension() {
        let config = Config {
            embedding_dim: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(MurmurError::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let config = Config {
            intent_confidence_threshold: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_cap_below_budget() {
        let config = Config {
            max_context_tokens: 8000,
            absolute_context_tokens: 4000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_rate_limits() {
        let config = Config {
            rate_limit_per_channel: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
