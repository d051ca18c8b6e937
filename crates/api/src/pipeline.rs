//! The boundary-facing message pipeline.
//!
//! Coordinates one inbound event end to end: drop self-authored messages,
//! rate-limit, short-circuit commands, hand off to the orchestrator with a
//! deadline, and emit structured metrics. Message content never reaches the
//! logs; user ids appear only as salted hashes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use murmur_common::{security, Config, InboundEvent, MurmurError, ReplySink, Result};
use murmur_coordinator::{help_reply, IntentCategory, Orchestrator};

use crate::rate_limit::RateLimiter;

const FAILURE_REPLY: &str = "Sorry, something went wrong while processing that. Please try again.";
const OVERFLOW_REPLY: &str =
    "That conversation has grown past what I can hold at once. Try a shorter message or start fresh.";
const UNKNOWN_COMMAND_REPLY: &str = "I don't recognize that command.";

/// Structured per-message metrics. Content is represented only by counts.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    pub request_id: String,
    pub user_id_hash: String,
    pub intent: &'static str,
    pub confidence: f32,
    pub latency_ms: u128,
    pub tokens_in: usize,
    pub tokens_out: usize,
    pub sources_count: usize,
}

/// Hook for the command surface. A `Some` reply short-circuits the pipeline.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, event: &InboundEvent) -> Result<Option<String>>;
}

pub struct MessagePipeline {
    config: Config,
    rate_limiter: Arc<RateLimiter>,
    orchestrator: Arc<Orchestrator>,
    command_handler: Option<Arc<dyn CommandHandler>>,
}

impl MessagePipeline {
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_global,
            config.rate_limit_per_channel,
        ));
        Self {
            config,
            rate_limiter,
            orchestrator,
            command_handler: None,
        }
    }

    pub fn with_command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.command_handler = Some(handler);
        self
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.rate_limiter)
    }

    /// Process one inbound event, streaming the reply to `sink`. The sink's
    /// `finish` is signalled exactly once, on every path.
    pub async fn handle(&self, event: &InboundEvent, sink: &dyn ReplySink) -> Result<()> {
        // Never answer bots, ourselves included.
        if event.is_bot {
            debug!("Dropping bot-authored event");
            return Ok(());
        }

        let result = self.run(event, sink).await;
        if let Err(ref err) = sink.finish().await {
            warn!(error = %err, "Reply sink finish failed");
        }
        result
    }

    async fn run(&self, event: &InboundEvent, sink: &dyn ReplySink) -> Result<()> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let user_hash = security::correlation_hash(&self.config.hash_salt, &event.author_id);
        let started = Instant::now();

        self.rate_limiter.acquire(&event.channel_id).await;

        // Empty input: canned help, no classification, no store writes.
        if event.text.trim().is_empty() {
            sink.send_chunk(help_reply()).await?;
            self.emit_metrics(PipelineMetrics {
                request_id,
                user_id_hash: user_hash,
                intent: IntentCategory::Unknown.as_str(),
                confidence: 0.0,
                latency_ms: started.elapsed().as_millis(),
                tokens_in: 0,
                tokens_out: 0,
                sources_count: 0,
            });
            return Ok(());
        }

        // Command surface: a configured prefix short-circuits the pipeline.
        if let Some(body) = event.text.strip_prefix(&self.config.command_prefix) {
            if !body.is_empty() && !body.starts_with(char::is_whitespace) {
                let reply = match &self.command_handler {
                    Some(handler) => handler.handle(event).await?,
                    None => None,
                };
                sink.send_chunk(reply.as_deref().unwrap_or(UNKNOWN_COMMAND_REPLY))
                    .await?;
                return Ok(());
            }
        }

        let deadline = started + Duration::from_secs(self.config.request_timeout_s);
        match self.orchestrator.handle(event, sink, Some(deadline)).await {
            Ok(outcome) => {
                self.emit_metrics(PipelineMetrics {
                    request_id,
                    user_id_hash: user_hash,
                    intent: outcome.intent.as_str(),
                    confidence: outcome.confidence,
                    latency_ms: started.elapsed().as_millis(),
                    tokens_in: outcome.tokens_in,
                    tokens_out: outcome.tokens_out,
                    sources_count: outcome.sources_count,
                });
                Ok(())
            }
            Err(err) if err.is_cancelled() => {
                info!(request_id = %request_id, user = %user_hash, "Request cancelled");
                Ok(())
            }
            Err(MurmurError::Context { .. }) => {
                // Over the absolute cap even post-reduction; the session
                // itself stays usable.
                sink.send_chunk(OVERFLOW_REPLY).await?;
                warn!(request_id = %request_id, user = %user_hash, "Context overflow");
                Ok(())
            }
            Err(err) => {
                error!(request_id = %request_id, user = %user_hash, error = %err, "Pipeline failure");
                sink.send_chunk(FAILURE_REPLY).await?;
                Err(err)
            }
        }
    }

    fn emit_metrics(&self, metrics: PipelineMetrics) {
        info!(
            request_id = %metrics.request_id,
            user = %metrics.user_id_hash,
            intent = metrics.intent,
            confidence = metrics.confidence,
            latency_ms = metrics.latency_ms,
            tokens_in = metrics.tokens_in,
            tokens_out = metrics.tokens_out,
            sources = metrics.sources_count,
            "Handled message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_coordinator::AgentRegistry;
    use murmur_llm::{EmbeddingClient, LlmClient, LlmRequest, LlmResponse};
    use murmur_store::Store;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FlatProvider;

    #[async_trait]
    impl LlmClient for FlatProvider {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content: "flat reply".into(),
                model: "flat".into(),
                usage: None,
                finish_reason: None,
            })
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            // Out-of-scope phrasing gets its own axis so ordinary test
            // messages never classify as out_of_scope.
            let lower = text.to_lowercase();
            let out_of_scope = lower.contains("transfer")
                || lower.contains("contract")
                || lower.contains("diagnose")
                || lower.contains("order");
            Ok(if out_of_scope {
                vec![0.0, 0.0, 0.0, 1.0]
            } else {
                vec![1.0, 0.0, 0.0, 0.0]
            })
        }
        fn model_name(&self) -> &str {
            "flat"
        }
        fn embedding_model(&self) -> &str {
            "flat-embed"
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        chunks: tokio::sync::Mutex<Vec<String>>,
        finished: AtomicU32,
    }

    #[async_trait]
    impl ReplySink for CollectingSink {
        async fn send_chunk(&self, chunk: &str) -> Result<()> {
            self.chunks.lock().await.push(chunk.to_string());
            Ok(())
        }
        async fn finish(&self) -> Result<()> {
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> Config {
        Config {
            embedding_dim: 4,
            chat_model: "flat".into(),
            embedding_model: "flat-embed".into(),
            ..Config::default()
        }
    }

    async fn pipeline() -> (MessagePipeline, Store) {
        let config = config();
        let store = Store::open_in_memory().unwrap();
        let llm: Arc<dyn LlmClient> = Arc::new(FlatProvider);
        let embedder = Arc::new(EmbeddingClient::from_config(Arc::clone(&llm), &config));
        let orchestrator = Arc::new(
            Orchestrator::new(config.clone(), store.clone(), llm, embedder, vec![]).unwrap(),
        );
        orchestrator.init().await.unwrap();
        (MessagePipeline::new(config, orchestrator), store)
    }

    fn event(text: &str, is_bot: bool) -> InboundEvent {
        InboundEvent {
            author_id: "U1".into(),
            channel_id: "C1".into(),
            is_dm: false,
            text: text.into(),
            is_bot,
        }
    }

    #[tokio::test]
    async fn bot_messages_are_dropped_silently() {
        let (pipeline, store) = pipeline().await;
        let sink = CollectingSink::default();
        pipeline.handle(&event("hello", true), &sink).await.unwrap();
        assert!(sink.chunks.lock().await.is_empty());
        assert_eq!(store.message_count("U1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_message_gets_canned_help_and_no_writes() {
        let (pipeline, store) = pipeline().await;
        let sink = CollectingSink::default();
        pipeline.handle(&event("   ", false), &sink).await.unwrap();

        let chunks = sink.chunks.lock().await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("remember"));
        drop(chunks);
        assert_eq!(store.message_count("U1").await.unwrap(), 0);
        assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finish_fires_exactly_once_per_event() {
        let (pipeline, _store) = pipeline().await;
        let sink = CollectingSink::default();
        pipeline
            .handle(&event("just some chatter", false), &sink)
            .await
            .unwrap();
        assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn command_prefix_short_circuits() {
        struct PingHandler {
            called: AtomicBool,
        }

        #[async_trait]
        impl CommandHandler for PingHandler {
            async fn handle(&self, _event: &InboundEvent) -> Result<Option<String>> {
                self.called.store(true, Ordering::SeqCst);
                Ok(Some("pong".into()))
            }
        }

        let (pipeline, store) = pipeline().await;
        let handler = Arc::new(PingHandler {
            called: AtomicBool::new(false),
        });
        let pipeline = pipeline.with_command_handler(handler.clone() as Arc<dyn CommandHandler>);

        let sink = CollectingSink::default();
        pipeline.handle(&event("!ping", false), &sink).await.unwrap();

        assert!(handler.called.load(Ordering::SeqCst));
        assert_eq!(sink.chunks.lock().await.join(""), "pong");
        // Short-circuited: the orchestrator never persisted anything.
        assert_eq!(store.message_count("U1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unprefixed_messages_reach_the_orchestrator() {
        let (pipeline, store) = pipeline().await;
        let sink = CollectingSink::default();
        pipeline
            .handle(&event("anything at all really", false), &sink)
            .await
            .unwrap();
        assert_eq!(store.message_count("U1").await.unwrap(), 2);
    }

    /// Registry construction is exercised here so a broken routing table
    /// fails fast in tests, not at startup in production.
    #[tokio::test]
    async fn default_registry_mapping_is_valid() {
        let (_pipeline, _store) = pipeline().await;
        assert!(AgentRegistry::default_mapping()
            .iter()
            .all(|(_, id)| id.starts_with("agent_")));
    }

    #[tokio::test]
    async fn sixty_rapid_events_are_all_served() {
        let mut config = config();
        config.rate_limit_per_channel = 50;
        config.rate_limit_global = 100;
        let store = Store::open_in_memory().unwrap();
        let llm: Arc<dyn LlmClient> = Arc::new(FlatProvider);
        let embedder = Arc::new(EmbeddingClient::from_config(Arc::clone(&llm), &config));
        let orchestrator = Arc::new(
            Orchestrator::new(config.clone(), store.clone(), llm, embedder, vec![]).unwrap(),
        );
        orchestrator.init().await.unwrap();
        let pipeline = Arc::new(MessagePipeline::new(config, orchestrator));

        let mut handles = Vec::new();
        for i in 0..60 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                let sink = CollectingSink::default();
                pipeline
                    .handle(&event(&format!("message {i}"), false), &sink)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // None were dropped.
        assert_eq!(store.message_count("U1").await.unwrap(), 120);
    }
}
