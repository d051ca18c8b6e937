//! Application state and the composition root.
//!
//! Every singleton (store, LLM client, embedding client, orchestrator,
//! pipeline, background sweepers) is constructed and initialized exactly
//! once, here. Shutdown tears them down in reverse order and is idempotent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use murmur_common::{Config, Result, TaskRegistry};
use murmur_coordinator::Orchestrator;
use murmur_llm::{build_llm_client, EmbeddingClient, LlmConfig};
use murmur_store::Store;

use crate::pipeline::MessagePipeline;

/// How often the periodic sweepers tick.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub orchestrator: Arc<Orchestrator>,
    pub pipeline: Arc<MessagePipeline>,
    pub tasks: TaskRegistry,
    pub start_time: Instant,
}

impl AppState {
    /// Build and initialize the full system from configuration.
    pub async fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Store::open(&config.db_path).await?;
        let llm = build_llm_client(&LlmConfig::from_config(&config))?;
        let embedder = Arc::new(EmbeddingClient::from_config(Arc::clone(&llm), &config));

        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            store.clone(),
            llm,
            embedder,
            Vec::new(),
        )?);
        orchestrator.init().await?;

        let pipeline = Arc::new(MessagePipeline::new(
            config.clone(),
            Arc::clone(&orchestrator),
        ));

        let state = Self {
            config,
            store,
            orchestrator,
            pipeline,
            tasks: TaskRegistry::new(),
            start_time: Instant::now(),
        };
        state.register_sweepers();
        Ok(state)
    }

    /// Register the periodic background tasks: session idle sweep, offload
    /// cache TTL sweep, rate-limiter bucket sweep. All are tracked and
    /// cancelled on shutdown.
    fn register_sweepers(&self) {
        let engine = self.orchestrator.context_engine();
        self.tasks.spawn("session-idle-sweeper", async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                engine.sweep_idle().await;
            }
        });

        let engine = self.orchestrator.context_engine();
        self.tasks.spawn("offload-ttl-sweeper", async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                engine.sweep_offload_cache();
            }
        });

        let limiter = self.pipeline.rate_limiter();
        self.tasks.spawn("rate-bucket-sweeper", async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                limiter.sweep_stale();
            }
        });
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Graceful, idempotent shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        self.tasks.close();
        self.orchestrator.close().await?;
        self.store.close().await;
        info!("Shutdown complete");
        Ok(())
    }
}
