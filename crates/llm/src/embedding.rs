//! The embedding client: deterministic truncation plus memoization.
//!
//! Input text is truncated by tokens (not characters) to the model limit
//! before the provider call, and results are cached in an LRU keyed by
//! `(model, text)` with a TTL, so repeated queries and hot memory keys do
//! not pay a provider round-trip.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use murmur_common::{Config, FailureKind, MurmurError, Result, Tokenizer};

use crate::client::LlmClient;

struct CachedEmbedding {
    vector: Vec<f32>,
    stored_at: Instant,
}

/// Cache hit/miss counters exposed through the admin surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct EmbeddingClient {
    inner: Arc<dyn LlmClient>,
    model: String,
    dimension: usize,
    max_tokens: usize,
    tokenizer: Tokenizer,
    ttl: Duration,
    cache: Mutex<LruCache<String, CachedEmbedding>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingClient {
    pub fn new(
        inner: Arc<dyn LlmClient>,
        model: impl Into<String>,
        dimension: usize,
        max_tokens: usize,
        cache_size: usize,
        ttl: Duration,
    ) -> Self {
        let model = model.into();
        let capacity = NonZeroUsize::new(cache_size.max(1)).expect("capacity is at least one");
        Self {
            tokenizer: Tokenizer::for_model(&model),
            inner,
            model,
            dimension,
            max_tokens,
            ttl,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(inner: Arc<dyn LlmClient>, config: &Config) -> Self {
        Self::new(
            inner,
            config.embedding_model.clone(),
            config.embedding_dim,
            config.embedding_max_tokens,
            config.embedding_cache_size,
            Duration::from_secs(config.embedding_cache_ttl_s),
        )
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn error(&self, kind: FailureKind, text_len: usize, message: impl Into<String>) -> MurmurError {
        MurmurError::Embedding {
            kind,
            model: self.model.clone(),
            text_len,
            message: message.into(),
        }
    }

    fn cache_key(&self, text: &str) -> String {
        format!("{}\u{1}{}", self.model, text)
    }

    /// Embed text into a fixed-dimension vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(self.error(FailureKind::Permanent, text.len(), "input text is empty"));
        }

        let (truncated, _) = self.tokenizer.truncate_to_budget(text, self.max_tokens);
        let key = self.cache_key(truncated);

        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.stored_at.elapsed() <= self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.vector.clone());
                }
                cache.pop(&key);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Provider round-trip happens outside the cache lock.
        let vector = self.inner.embed(truncated).await?;
        if vector.len() != self.dimension {
            return Err(self.error(
                FailureKind::Permanent,
                text.len(),
                format!(
                    "dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vector.len()
                ),
            ));
        }

        let mut cache = self.cache.lock().await;
        cache.put(
            key,
            CachedEmbedding {
                vector: vector.clone(),
                stored_at: Instant::now(),
            },
        );
        debug!(model = %self.model, cached = cache.len(), "Embedded text");
        Ok(vector)
    }

    /// Embed several texts, serving what the cache can and fetching every
    /// remaining distinct input in a single provider round-trip. Vectors come
    /// back in input order.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.trim().is_empty() {
                return Err(self.error(FailureKind::Permanent, text.len(), "input text is empty"));
            }
        }

        let truncated: Vec<&str> = texts
            .iter()
            .map(|text| self.tokenizer.truncate_to_budget(text, self.max_tokens).0)
            .collect();
        let keys: Vec<String> = truncated.iter().map(|text| self.cache_key(text)).collect();

        let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
        let mut missing: Vec<usize> = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            for (index, key) in keys.iter().enumerate() {
                if resolved.contains_key(key) || missing.iter().any(|&seen| &keys[seen] == key) {
                    continue;
                }
                if let Some(entry) = cache.get(key) {
                    if entry.stored_at.elapsed() <= self.ttl {
                        resolved.insert(key.clone(), entry.vector.clone());
                        continue;
                    }
                    cache.pop(key);
                }
                missing.push(index);
            }
        }
        self.hits.fetch_add(resolved.len() as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let batch: Vec<&str> = missing.iter().map(|&index| truncated[index]).collect();
            let batch_len: usize = batch.iter().map(|text| text.len()).sum();

            // One provider round-trip covers everything the cache missed.
            let vectors = self.inner.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(self.error(
                    FailureKind::Permanent,
                    batch_len,
                    format!(
                        "provider returned {} embeddings for {} inputs",
                        vectors.len(),
                        batch.len()
                    ),
                ));
            }

            let mut cache = self.cache.lock().await;
            for (&index, vector) in missing.iter().zip(vectors) {
                if vector.len() != self.dimension {
                    return Err(self.error(
                        FailureKind::Permanent,
                        truncated[index].len(),
                        format!(
                            "dimension mismatch: expected {}, got {}",
                            self.dimension,
                            vector.len()
                        ),
                    ));
                }
                cache.put(
                    keys[index].clone(),
                    CachedEmbedding {
                        vector: vector.clone(),
                        stored_at: Instant::now(),
                    },
                );
                resolved.insert(keys[index].clone(), vector);
            }
            debug!(model = %self.model, fetched = missing.len(), "Embedded batch");
        }

        Ok(keys.iter().map(|key| resolved[key].clone()).collect())
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        EmbeddingCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LlmRequest, LlmResponse};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingEmbedder {
        calls: AtomicU32,
        batch_calls: AtomicU32,
        dimension: usize,
    }

    impl CountingEmbedder {
        fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut vector = vec![0.0; self.dimension];
            vector[0] = text.len() as f32;
            vector
        }
    }

    #[async_trait]
    impl LlmClient for CountingEmbedder {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            unreachable!("embedding tests never chat")
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector_for(text))
        }
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|text| self.vector_for(text)).collect())
        }
        fn model_name(&self) -> &str {
            "counting"
        }
        fn embedding_model(&self) -> &str {
            "counting-embed"
        }
    }

    fn client(dimension: usize, ttl: Duration) -> (Arc<CountingEmbedder>, EmbeddingClient) {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            batch_calls: AtomicU32::new(0),
            dimension,
        });
        let embedder = EmbeddingClient::new(
            inner.clone() as Arc<dyn LlmClient>,
            "counting-embed",
            dimension,
            64,
            8,
            ttl,
        );
        (inner, embedder)
    }

    #[tokio::test]
    async fn repeated_embeds_hit_the_cache() {
        let (inner, embedder) = client(4, Duration::from_secs(300));

        let first = embedder.embed("hello world").await.unwrap();
        let second = embedder.embed("hello world").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        let stats = embedder.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let (inner, embedder) = client(4, Duration::from_millis(5));

        embedder.embed("hello").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        embedder.embed("hello").await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_input_is_a_permanent_error() {
        let (_, embedder) = client(4, Duration::from_secs(300));
        let err = embedder.embed("   ").await.unwrap_err();
        match err {
            MurmurError::Embedding { kind, .. } => assert_eq!(kind, FailureKind::Permanent),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn oversized_input_is_truncated_not_rejected() {
        let (_, embedder) = client(4, Duration::from_secs(300));
        let long = "word ".repeat(10_000);
        assert!(embedder.embed(&long).await.is_ok());
    }

    #[tokio::test]
    async fn truncation_is_deterministic() {
        let (_, embedder) = client(4, Duration::from_secs(300));
        let long = "many words flowing on and on ".repeat(1000);
        let a = embedder.embed(&long).await.unwrap();
        let b = embedder.embed(&long).await.unwrap();
        // Identical truncation means identical cache key, so one provider call.
        assert_eq!(a, b);
        assert_eq!(embedder.stats().misses, 1);
    }

    #[tokio::test]
    async fn batch_misses_fetch_in_one_round_trip() {
        let (inner, embedder) = client(4, Duration::from_secs(300));

        let vectors = embedder
            .embed_batch(&["alpha", "beta", "beta", "gamma"])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 4);
        // Duplicate inputs share one embedding.
        assert_eq!(vectors[1], vectors[2]);
        assert_eq!(inner.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_serves_cached_entries_without_refetching() {
        let (inner, embedder) = client(4, Duration::from_secs(300));

        let single = embedder.embed("alpha").await.unwrap();
        let vectors = embedder.embed_batch(&["alpha", "beta"]).await.unwrap();

        assert_eq!(vectors[0], single);
        // Only "beta" needed the provider, in one batched call.
        assert_eq!(inner.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.stats().hits, 1);
    }

    #[tokio::test]
    async fn batch_matches_single_embed_results() {
        let (_, embedder) = client(4, Duration::from_secs(300));
        let batched = embedder.embed_batch(&["one", "two"]).await.unwrap();
        let single = embedder.embed("two").await.unwrap();
        assert_eq!(batched[1], single);
    }

    #[tokio::test]
    async fn batch_rejects_empty_inputs() {
        let (_, embedder) = client(4, Duration::from_secs(300));
        assert!(embedder.embed_batch(&["fine", "  "]).await.is_err());
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_permanent() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            batch_calls: AtomicU32::new(0),
            dimension: 3,
        });
        let embedder = EmbeddingClient::new(
            inner as Arc<dyn LlmClient>,
            "counting-embed",
            8,
            64,
            8,
            Duration::from_secs(300),
        );
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
