use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use murmur_common::{ChunkStream, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// Provider contract: chat completions (buffered and streamed) plus text
/// embeddings, all over one client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Stream a completion as text chunks. The default implementation
    /// buffers `complete` into a single chunk, which keeps scripted test
    /// clients trivial.
    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        let response = self.complete(request).await?;
        Ok(futures::stream::once(async move { Ok(response.content) }).boxed())
    }

    /// Embed already-truncated text. Callers go through `EmbeddingClient`,
    /// which owns truncation and caching.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts in one provider round-trip, returning vectors in
    /// input order. The default loops `embed`, which keeps scripted test
    /// clients trivial; real providers override it.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str;

    fn embedding_model(&self) -> &str;
}

#[async_trait]
impl LlmClient for Box<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        (**self).complete(request).await
    }
    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        (**self).stream(request).await
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
    fn embedding_model(&self) -> &str {
        (**self).embedding_model()
    }
}
