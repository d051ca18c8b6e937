use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use murmur_common::{ChunkStream, Config, MurmurError, Result};

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub chat_model: String,
    pub embedding_model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_concurrent() -> usize {
    4
}

impl LlmConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            api_key: config.api_key.clone(),
            base_url: config.llm_base_url.clone(),
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

/// Caps in-flight provider requests with a semaphore.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
        }
    }

    async fn permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| MurmurError::llm_permanent(format!("semaphore closed: {e}")))
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self.permit().await?;
        self.inner.complete(request).await
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        // The permit covers stream setup only; the chunks themselves flow
        // without holding a slot, matching provider connection semantics.
        let _permit = self.permit().await?;
        self.inner.stream(request).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self.permit().await?;
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let _permit = self.permit().await?;
        self.inner.embed_batch(texts).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn embedding_model(&self) -> &str {
        self.inner.embedding_model()
    }
}

/// Build the production client chain: provider → retry → concurrency cap.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    if config.chat_model.is_empty() || config.embedding_model.is_empty() {
        return Err(MurmurError::Config("LLM model names cannot be empty".into()));
    }

    let base = OpenAiClient::new(
        config.base_url.clone(),
        config.chat_model.clone(),
        config.embedding_model.clone(),
        config.api_key.clone(),
    );
    let retrying = RetryingClient::new(base, config.retry.clone());
    let semaphored = SemaphoredClient::new(Arc::new(retrying), config.max_concurrent_requests);
    Ok(Arc::new(semaphored))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            chat_model: "gpt-4o".into(),
            embedding_model: "text-embedding-3-small".into(),
            api_key: Some("sk-test".into()),
            base_url: None,
            max_concurrent_requests: 2,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn build_client_exposes_model_names() {
        let client = build_llm_client(&config()).unwrap();
        assert_eq!(client.model_name(), "gpt-4o");
        assert_eq!(client.embedding_model(), "text-embedding-3-small");
    }

    #[test]
    fn empty_model_name_is_a_config_error() {
        let bad = LlmConfig {
            chat_model: String::new(),
            ..config()
        };
        assert!(matches!(
            build_llm_client(&bad),
            Err(MurmurError::Config(_))
        ));
    }

    #[tokio::test]
    async fn semaphored_client_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            concurrent: Arc<AtomicU32>,
            max_seen: Arc<AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse {
                    content: "ok".into(),
                    model: "counting".into(),
                    usage: None,
                    finish_reason: None,
                })
            }
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![0.0])
            }
            fn model_name(&self) -> &str {
                "counting"
            }
            fn embedding_model(&self) -> &str {
                "counting-embed"
            }
        }

        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));
        let client = Arc::new(SemaphoredClient::new(
            Arc::new(CountingClient {
                concurrent: concurrent.clone(),
                max_seen: max_seen.clone(),
            }),
            2,
        ));

        let mut handles = vec![];
        for _ in 0..6 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.complete(LlmRequest::default()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
