//! Per-user typed knowledge graph with embedded nodes.
//!
//! Nodes live in an arena table addressed by id; edges are typed, weighted,
//! and unique per `(source, target, edge_type)`. Traversal is breadth-first
//! over ids, bounded by depth, and never leaves the caller's partition.
//! Similarity search standardizes on cosine similarity in [-1, 1].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use murmur_common::{MurmurError, Result};
use murmur_llm::EmbeddingClient;
use murmur_store::{EdgeRow, GraphCounts, NodeHit, NodeRow, Store};

pub use murmur_store::Direction;

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Per-user statistics, surfaced via the admin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: i64,
    pub edge_count: i64,
    pub type_count: i64,
}

impl From<GraphCounts> for GraphStats {
    fn from(counts: GraphCounts) -> Self {
        Self {
            node_count: counts.node_count,
            edge_count: counts.edge_count,
            type_count: counts.type_count,
        }
    }
}

pub struct KnowledgeGraph {
    user_id: String,
    store: Store,
    embedder: Arc<EmbeddingClient>,
    similarity_threshold: f32,
}

impl KnowledgeGraph {
    pub fn new(
        user_id: impl Into<String>,
        store: Store,
        embedder: Arc<EmbeddingClient>,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            embedder,
            similarity_threshold,
        }
    }

    /// Text embedded for a node: its label qualified by type when present.
    fn node_text(label: &str, node_type: Option<&str>) -> String {
        match node_type {
            Some(node_type) => format!("{label} ({node_type})"),
            None => label.to_string(),
        }
    }

    /// Create a node with an embedding computed from label and type.
    pub async fn add_node(
        &self,
        label: &str,
        node_type: Option<&str>,
        properties: Option<serde_json::Value>,
    ) -> Result<NodeRow> {
        if label.trim().is_empty() {
            return Err(MurmurError::graph("node label cannot be empty"));
        }

        let embedding = self
            .embedder
            .embed(&Self::node_text(label, node_type))
            .await?;
        let properties = properties.unwrap_or_else(|| serde_json::json!({}));
        let node = self
            .store
            .node_insert(
                &self.user_id,
                label,
                node_type,
                &properties,
                Some(&embedding),
            )
            .await?;
        info!(node_type = node_type.unwrap_or("untyped"), "Added graph node");
        Ok(node)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<NodeRow>> {
        self.store.node_get(&self.user_id, node_id).await
    }

    /// Update properties and/or recompute the embedding for a new label text.
    pub async fn update_node(
        &self,
        node_id: &str,
        properties: Option<serde_json::Value>,
        reembed_label: Option<&str>,
    ) -> Result<bool> {
        let embedding = match reembed_label {
            Some(label) => Some(self.embedder.embed(label).await?),
            None => None,
        };
        self.store
            .node_update(
                &self.user_id,
                node_id,
                properties.as_ref(),
                embedding.as_deref(),
            )
            .await
    }

    /// Delete a node; its incident edges go with it.
    pub async fn delete_node(&self, node_id: &str) -> Result<bool> {
        let deleted = self.store.node_delete(&self.user_id, node_id).await?;
        if deleted {
            info!("Deleted graph node");
        }
        Ok(deleted)
    }

    /// Create a typed edge. Both endpoints must belong to this user; a
    /// duplicate `(source, target, edge_type)` is a conflict.
    pub async fn add_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: &str,
        weight: f64,
        properties: Option<serde_json::Value>,
    ) -> Result<EdgeRow> {
        if edge_type.trim().is_empty() {
            return Err(MurmurError::graph("edge type cannot be empty"));
        }

        let properties = properties.unwrap_or_else(|| serde_json::json!({}));
        let edge = self
            .store
            .edge_insert(
                &self.user_id,
                source_id,
                target_id,
                edge_type,
                weight,
                &properties,
            )
            .await?;
        info!(edge_type, "Added graph edge");
        Ok(edge)
    }

    pub async fn get_edges(
        &self,
        node_id: Option<&str>,
        edge_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EdgeRow>> {
        self.store
            .edges_list(&self.user_id, node_id, edge_type, limit)
            .await
    }

    /// Delete an edge after ownership is verified through its endpoints.
    pub async fn delete_edge(&self, edge_id: &str) -> Result<bool> {
        self.store.edge_delete(&self.user_id, edge_id).await
    }

    /// Rank nodes by cosine similarity to the query text, filtered by
    /// ownership, optional type, and the configured threshold. Ties break on
    /// primary key ascending.
    pub async fn search_nodes(
        &self,
        query: &str,
        node_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NodeHit>> {
        if query.trim().is_empty() {
            return Err(MurmurError::graph("search query cannot be empty"));
        }

        let query_embedding = self.embedder.embed(query).await?;
        let hits = self
            .store
            .nodes_search(
                &self.user_id,
                &query_embedding,
                node_type,
                self.similarity_threshold,
                limit,
            )
            .await?;
        debug!(results = hits.len(), "Graph node search finished");
        Ok(hits)
    }

    /// Neighbor nodes in the requested direction, optionally filtered by
    /// edge type.
    pub async fn get_neighbors(
        &self,
        node_id: &str,
        direction: Direction,
        edge_type: Option<&str>,
    ) -> Result<Vec<NodeRow>> {
        self.store
            .neighbors(&self.user_id, node_id, direction, edge_type)
            .await
    }

    /// Shortest path between two owned nodes, bounded by depth. Returns the
    /// node ids along the path including both endpoints, or None.
    pub async fn find_path(
        &self,
        source_id: &str,
        target_id: &str,
        max_depth: usize,
        edge_types: Option<&[String]>,
    ) -> Result<Option<Vec<String>>> {
        self.store
            .find_path(&self.user_id, source_id, target_id, max_depth, edge_types)
            .await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        Ok(self.store.graph_counts(&self.user_id).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_llm::{LlmClient, LlmRequest, LlmResponse};
    use std::time::Duration;

    /// Embeds labels onto axes so similarity ranking is predictable.
    struct AxisEmbedder;

    #[async_trait]
    impl LlmClient for AxisEmbedder {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            unreachable!("graph tests never chat")
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(if lower.contains("go") || lower.contains("language") {
                vec![0.9, 0.1, 0.0]
            } else if lower.contains("discord") || lower.contains("api") {
                vec![0.0, 0.9, 0.1]
            } else {
                vec![0.0, 0.0, 1.0]
            })
        }
        fn model_name(&self) -> &str {
            "axis"
        }
        fn embedding_model(&self) -> &str {
            "axis-embed"
        }
    }

    fn graph(store: &Store, user: &str) -> KnowledgeGraph {
        let embedder = Arc::new(EmbeddingClient::new(
            Arc::new(AxisEmbedder),
            "axis-embed",
            3,
            64,
            16,
            Duration::from_secs(300),
        ));
        KnowledgeGraph::new(user, store.clone(), embedder, 0.3)
    }

    #[tokio::test]
    async fn node_edge_path_scenario() {
        let store = Store::open_in_memory().unwrap();
        let kg = graph(&store, "u1");

        let go = kg.add_node("Go", Some("lang"), None).await.unwrap();
        let discord = kg.add_node("Discord", Some("api"), None).await.unwrap();
        kg.add_edge(&go.id, &discord.id, "used_with", 0.9, None)
            .await
            .unwrap();

        let hits = kg
            .search_nodes("programming language", None, DEFAULT_SEARCH_LIMIT)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].node.label, "Go");
        assert!(hits[0].similarity >= 0.3);

        let path = kg
            .find_path(&go.id, &discord.id, 3, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, vec![go.id.clone(), discord.id.clone()]);
    }

    #[tokio::test]
    async fn deleting_a_node_leaves_no_incident_edges() {
        let store = Store::open_in_memory().unwrap();
        let kg = graph(&store, "u1");
        let a = kg.add_node("Go", Some("lang"), None).await.unwrap();
        let b = kg.add_node("Discord", Some("api"), None).await.unwrap();
        kg.add_edge(&a.id, &b.id, "used_with", 1.0, None)
            .await
            .unwrap();

        assert!(kg.delete_node(&a.id).await.unwrap());
        assert!(kg.get_edges(None, None, 10).await.unwrap().is_empty());

        let stats = kg.stats().await.unwrap();
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.edge_count, 0);
    }

    #[tokio::test]
    async fn cross_user_edges_are_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mine = graph(&store, "u1");
        let theirs = graph(&store, "u2");

        let a = mine.add_node("Go", Some("lang"), None).await.unwrap();
        let b = theirs.add_node("Discord", Some("api"), None).await.unwrap();

        let result = mine.add_edge(&a.id, &b.id, "used_with", 1.0, None).await;
        assert!(matches!(result, Err(MurmurError::Authorization(_))));
    }

    #[tokio::test]
    async fn edge_delete_requires_ownership() {
        let store = Store::open_in_memory().unwrap();
        let mine = graph(&store, "u1");
        let theirs = graph(&store, "u2");

        let a = mine.add_node("A", None, None).await.unwrap();
        let b = mine.add_node("B", None, None).await.unwrap();
        let edge = mine.add_edge(&a.id, &b.id, "rel", 1.0, None).await.unwrap();

        assert!(!theirs.delete_edge(&edge.id).await.unwrap());
        assert!(mine.delete_edge(&edge.id).await.unwrap());
    }

    #[tokio::test]
    async fn search_filters_by_node_type() {
        let store = Store::open_in_memory().unwrap();
        let kg = graph(&store, "u1");
        kg.add_node("Go", Some("lang"), None).await.unwrap();
        kg.add_node("Gopher", Some("mascot"), None).await.unwrap();

        let hits = kg
            .search_nodes("language", Some("lang"), DEFAULT_SEARCH_LIMIT)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.node_type.as_deref(), Some("lang"));
    }

    #[tokio::test]
    async fn neighbors_follow_direction() {
        let store = Store::open_in_memory().unwrap();
        let kg = graph(&store, "u1");
        let hub = kg.add_node("Hub", None, None).await.unwrap();
        let down = kg.add_node("Down", None, None).await.unwrap();
        kg.add_edge(&hub.id, &down.id, "feeds", 1.0, None)
            .await
            .unwrap();

        let out = kg
            .get_neighbors(&hub.id, Direction::Out, None)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "Down");

        let incoming = kg
            .get_neighbors(&hub.id, Direction::In, None)
            .await
            .unwrap();
        assert!(incoming.is_empty());
    }

    #[tokio::test]
    async fn empty_label_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let kg = graph(&store, "u1");
        assert!(kg.add_node("  ", None, None).await.is_err());
    }
}
