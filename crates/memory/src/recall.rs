//! Recall memory: append-only vector-indexed episodic log per user.

use std::sync::Arc;

use tracing::{debug, warn};

use murmur_common::{security, MurmurError, Result};
use murmur_llm::EmbeddingClient;
use murmur_store::{RecallHit, RecallRow, Store};

use crate::types::{validate_importance, MemoryStats};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.7;

pub struct RecallMemory {
    user_id: String,
    store: Store,
    embedder: Arc<EmbeddingClient>,
}

impl RecallMemory {
    pub fn new(user_id: impl Into<String>, store: Store, embedder: Arc<EmbeddingClient>) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            embedder,
        }
    }

    /// Embed and append one item. Returns its id.
    pub async fn add(&self, content: &str, importance: f64) -> Result<String> {
        if content.trim().is_empty() {
            return Err(MurmurError::memory("recall", "content cannot be empty"));
        }
        validate_importance("recall", importance)?;

        let embedding = self.embedder.embed(content).await?;
        let row = self
            .store
            .recall_insert(&self.user_id, content, &embedding, importance)
            .await?;
        debug!(importance, "Added recall memory");
        Ok(row.id)
    }

    /// Semantic search over this user's partition, ordered by cosine
    /// similarity descending. Matches get their access counters bumped in a
    /// single batched background update.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
        min_importance: f64,
    ) -> Result<Vec<RecallHit>> {
        if query.trim().is_empty() {
            return Err(MurmurError::memory("recall", "search query cannot be empty"));
        }

        let query_embedding = self.embedder.embed(query).await?;
        let hits = self
            .store
            .recall_search(
                &self.user_id,
                &query_embedding,
                min_importance,
                threshold,
                limit,
            )
            .await?;

        if !hits.is_empty() {
            let ids: Vec<String> = hits.iter().map(|hit| hit.row.id.clone()).collect();
            let store = self.store.clone();
            let user_id = self.user_id.clone();
            tokio::spawn(async move {
                if let Err(err) = store.recall_bump_access(&user_id, &ids).await {
                    warn!(error = %err, "Recall access batch update failed");
                }
            });
        }

        debug!(
            results = hits.len(),
            query_hash = %security::content_hash(query),
            query_len = query.len(),
            "Recall search finished"
        );
        Ok(hits)
    }

    pub async fn get(&self, id: &str) -> Result<Option<RecallRow>> {
        self.store.recall_get(&self.user_id, id).await
    }

    pub async fn update_importance(&self, id: &str, importance: f64) -> Result<bool> {
        validate_importance("recall", importance)?;
        self.store
            .recall_update_importance(&self.user_id, id, importance)
            .await
    }

    /// Delete requires ownership; deleting another user's item is a no-op
    /// returning false.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.recall_delete(&self.user_id, id).await
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let item_count = self.store.recall_count(&self.user_id).await? as usize;
        Ok(MemoryStats {
            tier: "recall".into(),
            item_count,
            max_items: None,
            usage_percent: None,
            avg_importance: 0.0,
            total_access_count: 0,
        })
    }
}
