//! The per-message orchestrator.
//!
//! Drives each inbound message through the state machine
//! `RECEIVED → CLASSIFIED → ROUTED → ENRICHED → GENERATING → PERSISTED →
//! DONE`, with a `PENDING_APPROVAL` side-path for destructive requests and
//! `FAILED` on error. Memory enrichment degrades to empty hints instead of
//! failing the message; a stream that dies mid-generation still persists its
//! partial text, flagged as such.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use murmur_common::{
    Config, CoreHint, InboundEvent, MemoryHints, MurmurError, RecallHint, ReplySink, Result,
    Tokenizer,
};
use murmur_context::{ContextEngine, MessageContent, SessionStats};
use murmur_llm::{EmbeddingCacheStats, EmbeddingClient, LlmClient};
use murmur_memory::{ArchivalMemory, CoreMemory, RecallMemory};
use murmur_store::{MessageStatus, Store};

use murmur_agents::{
    start_all, stop_all, ConversationalAgent, GraphAgent, KnowledgeAgent, MemoryAgent, StudyAgent,
};
use murmur_common::{ChatRole, ChatTurn};

use crate::routing::{canned_reply, AgentRegistry};
use crate::triage::{IntentCategory, IntentClassifier, IntentEntities, IntentResult};

/// States of the per-message machine; logged, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Received,
    Classified,
    Routed,
    Enriched,
    Generating,
    Persisted,
    Done,
    Failed,
    PendingApproval,
}

/// Outcome of one handled message, feeding the pipeline's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct HandleOutcome {
    pub intent: IntentCategory,
    pub confidence: f32,
    pub sources_count: usize,
    pub tokens_in: usize,
    pub tokens_out: usize,
    pub partial: bool,
    pub cancelled: bool,
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
    NotFound,
}

/// The action a pending approval unlocks.
#[derive(Debug, Clone)]
enum PendingAction {
    ClearCoreMemory { user_id: String },
}

struct PendingApproval {
    description: String,
    created: Instant,
    status: ApprovalStatus,
    action: PendingAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub initialized: bool,
    pub agent_count: usize,
    pub active_sessions: usize,
    pub pending_approvals: usize,
    pub embedding_cache: EmbeddingCacheStats,
}

pub struct Orchestrator {
    config: Config,
    store: Store,
    embedder: Arc<EmbeddingClient>,
    classifier: IntentClassifier,
    registry: AgentRegistry,
    context: Arc<ContextEngine>,
    tokenizer: Tokenizer,
    approvals: parking_lot::Mutex<HashMap<String, PendingApproval>>,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    /// Build the orchestrator with the standard agent set and routing table.
    pub fn new(
        config: Config,
        store: Store,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<EmbeddingClient>,
        personality: Vec<String>,
    ) -> Result<Self> {
        let agents: Vec<Arc<dyn murmur_common::Agent>> = vec![
            Arc::new(ConversationalAgent::new(Arc::clone(&llm), personality.clone())),
            Arc::new(KnowledgeAgent::new(Arc::clone(&llm), personality.clone())),
            Arc::new(MemoryAgent::new(Arc::clone(&llm), personality.clone())),
            Arc::new(GraphAgent::new(Arc::clone(&llm), personality.clone())),
            Arc::new(StudyAgent::new(Arc::clone(&llm), personality)),
        ];
        let registry = AgentRegistry::new(
            agents,
            AgentRegistry::default_mapping(),
            "agent_conversational",
        )?;
        Ok(Self::from_parts(config, store, embedder, registry))
    }

    /// Build from an explicit registry; used by tests and custom deployments.
    pub fn from_parts(
        config: Config,
        store: Store,
        embedder: Arc<EmbeddingClient>,
        registry: AgentRegistry,
    ) -> Self {
        let context = Arc::new(ContextEngine::new(
            &config.chat_model,
            config.max_context_tokens,
            config.absolute_context_tokens,
            config.offload_cache_size,
            Duration::from_secs(config.session_idle_ttl_s),
        ));
        let classifier = IntentClassifier::new(
            Arc::clone(&embedder),
            config.intent_confidence_threshold,
        );
        Self {
            tokenizer: Tokenizer::for_model(&config.chat_model),
            config,
            store,
            embedder,
            classifier,
            registry,
            context,
            approvals: parking_lot::Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Idempotent startup: start every agent in parallel. Guarded by a
    /// cooperative lock with double-check.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        // Classifier centroids load lazily on first classification, behind
        // their own single-shot lock.
        start_all(&self.registry.agents()).await?;
        self.initialized.store(true, Ordering::Release);
        info!(agents = self.registry.len(), "Orchestrator running");
        Ok(())
    }

    /// Idempotent shutdown.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        stop_all(&self.registry.agents()).await?;
        self.approvals.lock().clear();
        info!("Orchestrator stopped");
        Ok(())
    }

    pub fn context_engine(&self) -> Arc<ContextEngine> {
        Arc::clone(&self.context)
    }

    fn ensure_running(&self) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(MurmurError::Config("orchestrator is not initialized".into()))
        }
        Ok(())
    }

    fn session_key(event: &InboundEvent) -> String {
        format!("{}:{}", event.author_id, event.channel_id)
    }

    fn outcome(
        &self,
        intent: &IntentResult,
        sources: usize,
        text_in: &str,
        text_out: &str,
        partial: bool,
        cancelled: bool,
        persisted: bool,
    ) -> HandleOutcome {
        HandleOutcome {
            intent: intent.category,
            confidence: intent.confidence,
            sources_count: sources,
            tokens_in: self.tokenizer.count(text_in),
            tokens_out: self.tokenizer.count(text_out),
            partial,
            cancelled,
            persisted,
        }
    }

    /// Handle one inbound message, streaming reply chunks to `sink`.
    ///
    /// The caller owns the `finish` signal; this method only sends chunks.
    pub async fn handle(
        &self,
        event: &InboundEvent,
        sink: &dyn ReplySink,
        deadline: Option<Instant>,
    ) -> Result<HandleOutcome> {
        self.ensure_running()?;
        let mut state = MessageState::Received;
        debug!(?state, channel = %event.channel_id, "Handling inbound event");

        // RECEIVED → CLASSIFIED. A broken classifier degrades to unknown.
        let intent = match self.classifier.classify(&event.text).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "Classification failed, treating as unknown");
                IntentResult {
                    category: IntentCategory::Unknown,
                    confidence: 0.0,
                    entities: IntentEntities::default(),
                }
            }
        };
        state = MessageState::Classified;
        debug!(
            intent = intent.category.as_str(),
            confidence = intent.confidence,
            ?state,
            "Classified message"
        );

        // Destructive request: park it behind an approval.
        if intent.entities.bulk_delete {
            let request_id = self.request_approval(
                "erase all stored core memory for this user",
                PendingAction::ClearCoreMemory {
                    user_id: event.author_id.clone(),
                },
            );
            state = MessageState::PendingApproval;
            debug!(?state, "Parked destructive request");
            sink.send_chunk(&format!(
                "That would erase everything I remember for you, so it needs \
                 an approval first (request {request_id})."
            ))
            .await?;
            return Ok(self.outcome(&intent, 0, &event.text, "", false, false, false));
        }

        // Social categories short-circuit to canned replies.
        if let Some(reply) = canned_reply(intent.category, &event.text) {
            sink.send_chunk(reply).await?;
            let persist = intent.category != IntentCategory::OutOfScope
                || self.config.persist_out_of_scope;
            if persist {
                self.persist_exchange(event, reply, MessageStatus::Complete)
                    .await?;
            }
            return Ok(self.outcome(&intent, 0, &event.text, reply, false, false, persist));
        }

        // CLASSIFIED → ROUTED. Unknown falls back to conversational.
        let agent = self.registry.resolve(intent.category);
        state = MessageState::Routed;
        debug!(?state, agent = agent.id(), "Routed message");

        // Execute a memory store before generating, so the acknowledgement
        // reflects reality.
        if intent.category == IntentCategory::MemoryStore {
            self.apply_memory_store(&event.author_id, &intent).await?;
        }

        // ROUTED → ENRICHED: recall and core retrieval run concurrently and
        // degrade to empty hints on failure.
        let hints = self.enrich(&event.author_id, &event.text, &intent.entities).await;
        state = MessageState::Enriched;
        debug!(?state, sources = hints.sources_count(), "Enriched message");

        // Token budgeting: context history first, then the new user message.
        let session_key = Self::session_key(event);
        let turns: Vec<ChatTurn> = self
            .context
            .get_context(&session_key, false)
            .await
            .iter()
            .map(|message| ChatTurn {
                role: message.role,
                content: message.content.as_text(),
            })
            .collect();
        self.context
            .add_message(
                &session_key,
                &event.author_id,
                ChatRole::User,
                event.text.as_str(),
                true,
            )
            .await?;

        // ENRICHED → GENERATING: stream chunks, honoring sink backpressure
        // and the request deadline at every suspension point.
        let mut stream = agent.process(&event.text, &turns, &hints).await?;
        state = MessageState::Generating;
        debug!(?state, "Streaming response");
        let mut response = String::new();
        let mut partial = false;
        let mut cancelled = false;

        while let Some(chunk) = stream.next().await {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    debug!("Deadline reached mid-stream");
                    partial = true;
                    cancelled = true;
                    break;
                }
            }
            match chunk {
                Ok(text) => {
                    sink.send_chunk(&text).await?;
                    response.push_str(&text);
                }
                Err(err) if err.is_cancelled() => {
                    partial = true;
                    cancelled = true;
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "Stream failed mid-generation");
                    partial = true;
                    break;
                }
            }
        }
        drop(stream);

        // GENERATING → PERSISTED: the exchange lands in one transaction;
        // partial text is still flushed, flagged as partial.
        let status = if partial {
            MessageStatus::Partial
        } else {
            MessageStatus::Complete
        };
        self.persist_exchange(event, &response, status).await?;
        state = MessageState::Persisted;
        debug!(?state, status = status.as_str(), "Persisted exchange");

        // Feed recall so future conversations can surface this exchange.
        if !partial && should_remember(intent.category) {
            let recall = RecallMemory::new(
                event.author_id.clone(),
                self.store.clone(),
                Arc::clone(&self.embedder),
            );
            let importance = 0.5 + f64::from(intent.confidence) * 0.3;
            let interaction = format!("User: {}\nAssistant: {}", event.text, response);
            if let Err(err) = recall.add(&interaction, importance.min(1.0)).await {
                warn!(error = %err, "Failed to store interaction in recall");
            }
        }

        state = MessageState::Done;
        debug!(?state, partial, cancelled, "Message handled");
        Ok(self.outcome(
            &intent,
            hints.sources_count(),
            &event.text,
            &response,
            partial,
            cancelled,
            true,
        ))
    }

    async fn apply_memory_store(&self, user_id: &str, intent: &IntentResult) -> Result<()> {
        let (Some(key), Some(value)) = (
            intent.entities.memory_key.as_deref(),
            intent.entities.memory_value.as_deref(),
        ) else {
            return Ok(());
        };

        let core = CoreMemory::new(user_id, self.store.clone(), self.config.core_memory_max);
        let importance = (0.5 + f64::from(intent.confidence) * 0.3).min(1.0);
        core.add(key, value, importance, None).await?;
        info!("Stored core fact from message");
        Ok(())
    }

    /// Concurrent recall + core retrieval. Failures are logged and degrade
    /// to empty hints; enrichment never fails a message.
    async fn enrich(&self, user_id: &str, query: &str, entities: &IntentEntities) -> MemoryHints {
        let recall = RecallMemory::new(
            user_id.to_string(),
            self.store.clone(),
            Arc::clone(&self.embedder),
        );
        let core = CoreMemory::new(user_id, self.store.clone(), self.config.core_memory_max);

        let graph = murmur_graph::KnowledgeGraph::new(
            user_id,
            self.store.clone(),
            Arc::clone(&self.embedder),
            self.config.graph_similarity_threshold,
        );

        let recall_fut = recall.search(query, 3, 0.6, 0.0);
        let graph_fut = async {
            if entities.node_labels.is_empty() {
                return Ok(Vec::new());
            }
            graph.search_nodes(query, None, 5).await
        };
        let core_fut = async {
            match entities.memory_key.as_deref() {
                Some(key) => {
                    let value = core.get(key).await?;
                    Ok::<Vec<CoreHint>, MurmurError>(
                        value
                            .map(|value| CoreHint {
                                key: key.to_string(),
                                value,
                            })
                            .into_iter()
                            .collect(),
                    )
                }
                None => {
                    let facts = core.list(None).await?;
                    Ok(facts
                        .into_iter()
                        .take(5)
                        .map(|fact| CoreHint {
                            key: fact.key,
                            value: fact.value,
                        })
                        .collect())
                }
            }
        };

        let (recall_result, graph_result, core_result) =
            tokio::join!(recall_fut, graph_fut, core_fut);

        let mut recall_hints: Vec<RecallHint> = match recall_result {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| RecallHint {
                    content: hit.row.content,
                    similarity: hit.similarity,
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "Recall enrichment failed, degrading to empty");
                Vec::new()
            }
        };
        match graph_result {
            Ok(hits) => {
                recall_hints.extend(hits.into_iter().map(|hit| RecallHint {
                    content: match hit.node.node_type.as_deref() {
                        Some(node_type) => format!("{} ({node_type})", hit.node.label),
                        None => hit.node.label.clone(),
                    },
                    similarity: hit.similarity,
                }));
            }
            Err(err) => {
                warn!(error = %err, "Graph enrichment failed, degrading to empty");
            }
        }
        let core_hints = match core_result {
            Ok(hints) => hints,
            Err(err) => {
                warn!(error = %err, "Core enrichment failed, degrading to empty");
                Vec::new()
            }
        };

        MemoryHints {
            core: core_hints,
            recall: recall_hints,
        }
    }

    async fn persist_exchange(
        &self,
        event: &InboundEvent,
        response: &str,
        status: MessageStatus,
    ) -> Result<()> {
        self.store
            .session_append_exchange(
                &event.author_id,
                &event.channel_id,
                &event.text,
                response,
                status,
            )
            .await?;

        let session_key = Self::session_key(event);
        if !response.is_empty() {
            if let Err(err) = self
                .context
                .add_message(
                    &session_key,
                    &event.author_id,
                    ChatRole::Assistant,
                    MessageContent::Text(response.to_string()),
                    true,
                )
                .await
            {
                warn!(error = %err, "Assistant message did not fit the context budget");
            }
        }
        Ok(())
    }

    fn request_approval(&self, description: &str, action: PendingAction) -> String {
        let request_id = format!("approval_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        self.approvals.lock().insert(
            request_id.clone(),
            PendingApproval {
                description: description.to_string(),
                created: Instant::now(),
                status: ApprovalStatus::Pending,
                action,
            },
        );
        info!(request = %request_id, description, "Created approval request");
        request_id
    }

    /// Current status of an approval, applying the timeout lazily.
    pub fn check_approval(&self, request_id: &str) -> ApprovalStatus {
        let timeout = Duration::from_secs(self.config.approval_timeout_s);
        let mut approvals = self.approvals.lock();
        let Some(approval) = approvals.get_mut(request_id) else {
            return ApprovalStatus::NotFound;
        };
        if approval.status == ApprovalStatus::Pending && approval.created.elapsed() > timeout {
            approval.status = ApprovalStatus::Timeout;
            warn!(request = %request_id, "Approval request timed out");
        }
        approval.status
    }

    /// Resolve a pending approval. Approving executes the parked action.
    pub async fn approve(&self, request_id: &str, approved: bool) -> Result<ApprovalStatus> {
        let action = {
            let mut approvals = self.approvals.lock();
            let Some(approval) = approvals.get_mut(request_id) else {
                return Ok(ApprovalStatus::NotFound);
            };
            if approval.status == ApprovalStatus::Pending
                && approval.created.elapsed() > Duration::from_secs(self.config.approval_timeout_s)
            {
                approval.status = ApprovalStatus::Timeout;
            }
            if approval.status != ApprovalStatus::Pending {
                return Ok(approval.status);
            }
            approval.status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Denied
            };
            info!(request = %request_id, approved, description = %approval.description, "Approval resolved");
            approved.then(|| approval.action.clone())
        };

        if let Some(action) = action {
            match action {
                PendingAction::ClearCoreMemory { user_id } => {
                    let removed = self.store.core_clear(&user_id).await?;
                    info!(removed, "Executed approved core memory wipe");
                }
            }
            return Ok(ApprovalStatus::Approved);
        }
        Ok(if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        })
    }

    pub async fn session_stats(&self, session_key: &str) -> SessionStats {
        self.context.session_stats(session_key).await
    }

    pub async fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            initialized: self.initialized.load(Ordering::Acquire),
            agent_count: self.registry.len(),
            active_sessions: self.context.session_count(),
            pending_approvals: self
                .approvals
                .lock()
                .values()
                .filter(|a| a.status == ApprovalStatus::Pending)
                .count(),
            embedding_cache: self.embedder.stats(),
        }
    }

    /// Memory-tier stats for one user, surfaced via the admin endpoint.
    pub async fn memory_stats(&self, user_id: &str) -> Result<Vec<murmur_memory::MemoryStats>> {
        let core = CoreMemory::new(user_id, self.store.clone(), self.config.core_memory_max);
        let recall = RecallMemory::new(
            user_id.to_string(),
            self.store.clone(),
            Arc::clone(&self.embedder),
        );
        let archival = ArchivalMemory::new(user_id, self.store.clone());
        Ok(vec![
            core.stats().await?,
            recall.stats().await?,
            archival.stats().await?,
        ])
    }
}

/// Whether an exchange of this category feeds recall memory.
fn should_remember(category: IntentCategory) -> bool {
    !matches!(
        category,
        IntentCategory::Greeting
            | IntentCategory::Farewell
            | IntentCategory::Thanks
            | IntentCategory::Help
            | IntentCategory::Status
            | IntentCategory::OutOfScope
    )
}
