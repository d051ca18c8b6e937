//! LLM provider client and embedding client for Murmur.
//!
//! One provider surface serves chat completions (buffered and streamed) and
//! text embeddings. Production clients are wrapped in a retry layer for
//! transient failures and a semaphore that caps in-flight requests; the
//! embedding path adds deterministic token truncation and an LRU+TTL cache.

pub mod client;
pub mod config;
pub mod embedding;
pub mod openai;
pub mod retry;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{build_llm_client, LlmConfig, SemaphoredClient};
pub use embedding::{EmbeddingCacheStats, EmbeddingClient};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
