//! Archival memory: compressed long-form storage with metadata filtering.

use tracing::{debug, info};

use murmur_common::{security, MurmurError, Result};
use murmur_store::{ArchivalRow, CompressionOutcome, Store};

use crate::types::MemoryStats;

pub struct ArchivalMemory {
    user_id: String,
    store: Store,
}

impl ArchivalMemory {
    pub fn new(user_id: impl Into<String>, store: Store) -> Self {
        Self {
            user_id: user_id.into(),
            store,
        }
    }

    /// Store content verbatim with source tracking. Returns the item id.
    pub async fn archive(
        &self,
        content: &str,
        source: &str,
        metadata: Option<serde_json::Value>,
        session_id: Option<&str>,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(MurmurError::memory("archival", "content cannot be empty"));
        }
        if source.trim().is_empty() {
            return Err(MurmurError::memory("archival", "source cannot be empty"));
        }

        let mut metadata = match metadata {
            Some(serde_json::Value::Object(map)) => map,
            Some(other) => {
                return Err(MurmurError::memory(
                    "archival",
                    format!("metadata must be a JSON object, got {other}"),
                ))
            }
            None => serde_json::Map::new(),
        };
        metadata
            .entry("source")
            .or_insert_with(|| serde_json::Value::String(source.to_string()));

        let row = self
            .store
            .archival_insert(
                &self.user_id,
                content,
                source,
                &serde_json::Value::Object(metadata),
                session_id,
            )
            .await?;
        info!(source, "Archived memory");
        Ok(row.id)
    }

    /// Compress every uncompressed item of a session into one summary item.
    /// The three store operations commit atomically or not at all.
    pub async fn compress(
        &self,
        session_id: &str,
        summary: Option<String>,
    ) -> Result<Option<CompressionOutcome>> {
        let outcome = self
            .store
            .archival_compress(&self.user_id, session_id, summary)
            .await?;
        if let Some(ref outcome) = outcome {
            info!(
                original_count = outcome.original_count,
                "Compressed session memories"
            );
        }
        Ok(outcome)
    }

    /// Filter by metadata. Dotted keys address nested values; hostile key
    /// paths are rejected before any SQL is built.
    pub async fn search_by_metadata(
        &self,
        filters: &serde_json::Map<String, serde_json::Value>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ArchivalRow>> {
        let filters: Vec<(String, String)> = filters
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect();

        let rows = self
            .store
            .archival_by_metadata(&self.user_id, &filters, limit, offset)
            .await?;
        debug!(
            results = rows.len(),
            filter_count = filters.len(),
            "Archival metadata search finished"
        );
        Ok(rows)
    }

    /// Substring search over content with wildcard escaping.
    pub async fn search_by_content(
        &self,
        query: &str,
        limit: usize,
        source: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Vec<ArchivalRow>> {
        if query.trim().is_empty() {
            return Err(MurmurError::memory("archival", "search query cannot be empty"));
        }

        let rows = self
            .store
            .archival_by_content(&self.user_id, query, source, session_id, limit)
            .await?;
        debug!(
            results = rows.len(),
            query_hash = %security::content_hash(query),
            query_len = query.len(),
            "Archival content search finished"
        );
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ArchivalRow>> {
        self.store.archival_get(&self.user_id, id).await
    }

    /// Merge metadata into an existing item.
    pub async fn update_metadata(&self, id: &str, metadata: serde_json::Value) -> Result<bool> {
        if !metadata.is_object() {
            return Err(MurmurError::memory(
                "archival",
                "metadata must be a JSON object",
            ));
        }
        self.store
            .archival_update_metadata(&self.user_id, id, &metadata)
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.archival_delete(&self.user_id, id).await
    }

    /// All items of one session, oldest first.
    pub async fn session_memories(
        &self,
        session_id: &str,
        include_compressed: bool,
        limit: usize,
    ) -> Result<Vec<ArchivalRow>> {
        self.store
            .archival_session_memories(&self.user_id, session_id, include_compressed, limit)
            .await
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let item_count = self.store.archival_count(&self.user_id).await? as usize;
        Ok(MemoryStats {
            tier: "archival".into(),
            item_count,
            max_items: None,
            usage_percent: None,
            avg_importance: 0.0,
            total_access_count: 0,
        })
    }
}
