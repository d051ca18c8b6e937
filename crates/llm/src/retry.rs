use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use murmur_common::{ChunkStream, MurmurError, Result};

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Retries transient failures with exponential backoff. Permanent failures,
/// conflicts, and cancellation surface immediately.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * deterministic_jitter(attempt)) as u64;
        (base as u64).saturating_add(jitter).min(self.config.max_delay_ms)
    }

    async fn run<F, Fut, R>(&self, operation: &str, mut call: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let mut last_error: Option<MurmurError> = None;

        for attempt in 0..=self.config.max_retries {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt == self.config.max_retries || !err.is_transient() {
                        return Err(err);
                    }

                    let delay = self.compute_delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay,
                        error = %err,
                        "Retrying LLM request"
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.expect("retry loop exits by return"))
    }
}

/// Jitter from the attempt number alone, so retry timing is reproducible.
fn deterministic_jitter(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2654435761);
    (x % 100) as f64 / 100.0
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.run("complete", || self.inner.complete(request.clone()))
            .await
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        // Only the initial call is retried; an interrupted stream surfaces
        // through the chunk items so partial output can still be persisted.
        self.run("stream", || self.inner.stream(request.clone()))
            .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run("embed", || self.inner.embed(text)).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.run("embed_batch", || self.inner.embed_batch(texts))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn embedding_model(&self) -> &str {
        self.inner.embedding_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures_before_success: u32,
        calls: AtomicU32,
        permanent: bool,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                if self.permanent {
                    return Err(MurmurError::llm_permanent("401 unauthorized"));
                }
                return Err(MurmurError::llm_transient("503 service unavailable"));
            }
            Ok(LlmResponse {
                content: "ok".into(),
                model: "flaky".into(),
                usage: None,
                finish_reason: None,
            })
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn embedding_model(&self) -> &str {
            "flaky-embed"
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_before_success: 2,
                calls: AtomicU32::new(0),
                permanent: false,
            },
            fast_config(),
        );

        let response = client.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_surface_immediately() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_before_success: 10,
                calls: AtomicU32::new(0),
                permanent: true,
            },
            fast_config(),
        );

        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_before_success: 10,
                calls: AtomicU32::new(0),
                permanent: false,
            },
            fast_config(),
        );

        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn delay_respects_max() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_before_success: 0,
                calls: AtomicU32::new(0),
                permanent: false,
            },
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
                backoff_multiplier: 10.0,
            },
        );
        assert!(client.compute_delay(5) <= 2000);
    }

    #[test]
    fn jitter_is_deterministic() {
        assert_eq!(deterministic_jitter(3), deterministic_jitter(3));
    }
}
