//! Typed queries for the knowledge graph tables.
//!
//! Nodes are arena rows addressed by id; traversal works on ids via a
//! depth-bounded recursive query, never in-memory pointers. Edges require
//! both endpoints in the caller's partition.

use rusqlite::params;

use murmur_common::{MurmurError, Result};

use crate::types::{EdgeRow, GraphCounts, NodeHit, NodeRow};
use crate::vector::{cosine_similarity, encode_embedding};
use crate::{map_store_err, new_id, now_ts, Store};

const NODE_COLUMNS: &str = "id, user_id, label, node_type, properties, embedding, \
                            created_at, updated_at";
const EDGE_COLUMNS: &str = "e.id, e.source_id, e.target_id, e.edge_type, e.weight, \
                            e.properties, e.created_at";

impl Store {
    /// Insert a node and return it in a single round-trip.
    pub async fn node_insert(
        &self,
        user_id: &str,
        label: &str,
        node_type: Option<&str>,
        properties: &serde_json::Value,
        embedding: Option<&[f32]>,
    ) -> Result<NodeRow> {
        let conn = self.conn().await?;
        let sql = format!(
            "INSERT INTO knowledge_nodes \
                 (id, user_id, label, node_type, properties, embedding, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
             RETURNING {NODE_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                new_id(),
                user_id,
                label,
                node_type,
                properties.to_string(),
                embedding.map(encode_embedding),
                now_ts(),
            ],
            NodeRow::from_row,
        )
        .map_err(map_store_err)
    }

    pub async fn node_get(&self, user_id: &str, id: &str) -> Result<Option<NodeRow>> {
        let conn = self.conn().await?;
        let sql =
            format!("SELECT {NODE_COLUMNS} FROM knowledge_nodes WHERE id = ?1 AND user_id = ?2");
        match conn.query_row(&sql, params![id, user_id], NodeRow::from_row) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(map_store_err(err)),
        }
    }

    /// Update properties and/or embedding of an owned node.
    pub async fn node_update(
        &self,
        user_id: &str,
        id: &str,
        properties: Option<&serde_json::Value>,
        embedding: Option<&[f32]>,
    ) -> Result<bool> {
        if properties.is_none() && embedding.is_none() {
            return Ok(false);
        }

        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(props) = properties {
            sets.push("properties = json_patch(properties, ?)");
            values.push(Box::new(props.to_string()));
        }
        if let Some(vector) = embedding {
            sets.push("embedding = ?");
            values.push(Box::new(encode_embedding(vector)));
        }
        values.push(Box::new(id.to_string()));
        values.push(Box::new(user_id.to_string()));

        let sql = format!(
            "UPDATE knowledge_nodes SET {} WHERE id = ? AND user_id = ?",
            sets.join(", ")
        );
        let conn = self.conn().await?;
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let affected = conn.execute(&sql, refs.as_slice()).map_err(map_store_err)?;
        Ok(affected > 0)
    }

    /// Delete a node; incident edges cascade.
    pub async fn node_delete(&self, user_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "DELETE FROM knowledge_nodes WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(map_store_err)?;
        Ok(affected > 0)
    }

    /// Similarity search over the user's embedded nodes. Cosine similarity in
    /// [-1, 1], descending, primary key ascending on ties.
    pub async fn nodes_search(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        node_type: Option<&str>,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<NodeHit>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM knowledge_nodes \
             WHERE user_id = ?1 AND embedding IS NOT NULL \
               AND (?2 IS NULL OR node_type = ?2)"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let nodes = stmt
            .query_map(params![user_id, node_type], NodeRow::from_row)
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;

        let mut hits: Vec<NodeHit> = nodes
            .into_iter()
            .filter_map(|node| {
                let similarity =
                    cosine_similarity(query_embedding, node.embedding.as_deref().unwrap_or(&[]));
                (similarity >= threshold).then_some(NodeHit { node, similarity })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Insert an edge after verifying both endpoints belong to the caller.
    /// Duplicate `(source, target, edge_type)` surfaces as `StoreConflict`.
    pub async fn edge_insert(
        &self,
        user_id: &str,
        source_id: &str,
        target_id: &str,
        edge_type: &str,
        weight: f64,
        properties: &serde_json::Value,
    ) -> Result<EdgeRow> {
        let conn = self.conn().await?;

        let expected: i64 = if source_id == target_id { 1 } else { 2 };
        let owned: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM knowledge_nodes \
                 WHERE id IN (?1, ?2) AND user_id = ?3",
                params![source_id, target_id, user_id],
                |row| row.get(0),
            )
            .map_err(map_store_err)?;
        if owned != expected {
            return Err(MurmurError::Authorization(format!(
                "edge endpoints must both belong to user partition (owned {owned}/{expected})"
            )));
        }

        conn.query_row(
            "INSERT INTO knowledge_edges \
                 (id, source_id, target_id, edge_type, weight, properties, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
             RETURNING id, source_id, target_id, edge_type, weight, properties, created_at",
            params![
                new_id(),
                source_id,
                target_id,
                edge_type,
                weight,
                properties.to_string(),
                now_ts(),
            ],
            EdgeRow::from_row,
        )
        .map_err(map_store_err)
    }

    /// List edges, optionally restricted to those incident to one node and/or
    /// one edge type.
    pub async fn edges_list(
        &self,
        user_id: &str,
        node_id: Option<&str>,
        edge_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EdgeRow>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM knowledge_edges e \
             JOIN knowledge_nodes s ON s.id = e.source_id \
             WHERE s.user_id = ?1 \
               AND (?2 IS NULL OR e.source_id = ?2 OR e.target_id = ?2) \
               AND (?3 IS NULL OR e.edge_type = ?3) \
             ORDER BY e.created_at DESC, e.id ASC \
             LIMIT ?4"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let rows = stmt
            .query_map(
                params![user_id, node_id, edge_type, limit as i64],
                EdgeRow::from_row,
            )
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;
        Ok(rows)
    }

    /// Neighbor nodes in the requested direction. `both` runs as a single
    /// union query parameterized by edge type.
    pub async fn neighbors(
        &self,
        user_id: &str,
        node_id: &str,
        direction: Direction,
        edge_type: Option<&str>,
    ) -> Result<Vec<NodeRow>> {
        let membership = match direction {
            Direction::Out => {
                "SELECT target_id FROM knowledge_edges \
                 WHERE source_id = ?1 AND (?3 IS NULL OR edge_type = ?3)"
            }
            Direction::In => {
                "SELECT source_id FROM knowledge_edges \
                 WHERE target_id = ?1 AND (?3 IS NULL OR edge_type = ?3)"
            }
            Direction::Both => {
                "SELECT target_id FROM knowledge_edges \
                 WHERE source_id = ?1 AND (?3 IS NULL OR edge_type = ?3) \
                 UNION \
                 SELECT source_id FROM knowledge_edges \
                 WHERE target_id = ?1 AND (?3 IS NULL OR edge_type = ?3)"
            }
        };
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM knowledge_nodes \
             WHERE user_id = ?2 AND id IN ({membership}) \
             ORDER BY id ASC"
        );

        let conn = self.conn().await?;
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let rows = stmt
            .query_map(params![node_id, user_id, edge_type], NodeRow::from_row)
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;
        Ok(rows)
    }

    /// Breadth-first path search bounded by depth, entirely inside one
    /// recursive query. Every hop stays in the caller's partition.
    pub async fn find_path(
        &self,
        user_id: &str,
        source_id: &str,
        target_id: &str,
        max_depth: usize,
        edge_types: Option<&[String]>,
    ) -> Result<Option<Vec<String>>> {
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(source_id.to_string()),
            Box::new(target_id.to_string()),
            Box::new(user_id.to_string()),
            Box::new(max_depth as i64),
        ];
        let edge_filter = match edge_types {
            Some(types) if !types.is_empty() => {
                let placeholders: Vec<String> = (0..types.len())
                    .map(|i| format!("?{}", values.len() + 1 + i))
                    .collect();
                for edge_type in types {
                    values.push(Box::new(edge_type.clone()));
                }
                format!("AND e.edge_type IN ({})", placeholders.join(", "))
            }
            _ => String::new(),
        };

        let sql = format!(
            "WITH RECURSIVE walk (node_id, path, depth) AS ( \
                 SELECT ?1, CAST(?1 AS TEXT), 0 \
                 WHERE EXISTS ( \
                     SELECT 1 FROM knowledge_nodes WHERE id = ?1 AND user_id = ?3 \
                 ) \
                 UNION ALL \
                 SELECT e.target_id, walk.path || '/' || e.target_id, walk.depth + 1 \
                 FROM walk \
                 JOIN knowledge_edges e ON e.source_id = walk.node_id \
                 JOIN knowledge_nodes n ON n.id = e.target_id \
                 WHERE n.user_id = ?3 \
                   AND walk.depth < ?4 \
                   AND INSTR(walk.path, e.target_id) = 0 \
                   {edge_filter} \
             ) \
             SELECT path FROM walk WHERE node_id = ?2 ORDER BY depth ASC LIMIT 1"
        );

        let conn = self.conn().await?;
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        match conn.query_row(&sql, refs.as_slice(), |row| row.get::<_, String>(0)) {
            Ok(path) => Ok(Some(path.split('/').map(str::to_string).collect())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(map_store_err(err)),
        }
    }

    /// Delete an edge after verifying ownership through its endpoints.
    pub async fn edge_delete(&self, user_id: &str, edge_id: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "DELETE FROM knowledge_edges \
                 WHERE id = ?1 AND source_id IN ( \
                     SELECT id FROM knowledge_nodes WHERE user_id = ?2 \
                 ) AND target_id IN ( \
                     SELECT id FROM knowledge_nodes WHERE user_id = ?2 \
                 )",
                params![edge_id, user_id],
            )
            .map_err(map_store_err)?;
        Ok(affected > 0)
    }

    pub async fn graph_counts(&self, user_id: &str) -> Result<GraphCounts> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT \
                 COUNT(DISTINCT n.id), \
                 COUNT(DISTINCT e.id), \
                 COUNT(DISTINCT n.node_type) \
             FROM knowledge_nodes n \
             LEFT JOIN knowledge_edges e ON e.source_id = n.id OR e.target_id = n.id \
             WHERE n.user_id = ?1",
            params![user_id],
            |row| {
                Ok(GraphCounts {
                    node_count: row.get(0)?,
                    edge_count: row.get(1)?,
                    type_count: row.get(2)?,
                })
            },
        )
        .map_err(map_store_err)
    }
}

/// Direction of neighbor traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node(store: &Store, user: &str, label: &str, embedding: &[f32]) -> NodeRow {
        store
            .node_insert(user, label, Some("test"), &serde_json::json!({}), Some(embedding))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn edge_requires_same_partition_endpoints() {
        let store = Store::open_in_memory().unwrap();
        let mine = node(&store, "u1", "Go", &[1.0, 0.0]).await;
        let theirs = node(&store, "u2", "Discord", &[0.0, 1.0]).await;

        let result = store
            .edge_insert("u1", &mine.id, &theirs.id, "used_with", 0.9, &serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(MurmurError::Authorization(_))));
    }

    #[tokio::test]
    async fn duplicate_edge_is_a_conflict() {
        let store = Store::open_in_memory().unwrap();
        let a = node(&store, "u1", "Go", &[1.0, 0.0]).await;
        let b = node(&store, "u1", "Discord", &[0.0, 1.0]).await;

        store
            .edge_insert("u1", &a.id, &b.id, "used_with", 1.0, &serde_json::json!({}))
            .await
            .unwrap();
        let dup = store
            .edge_insert("u1", &a.id, &b.id, "used_with", 0.5, &serde_json::json!({}))
            .await;
        assert!(matches!(dup, Err(MurmurError::StoreConflict(_))));
    }

    #[tokio::test]
    async fn deleting_a_node_cascades_to_edges() {
        let store = Store::open_in_memory().unwrap();
        let a = node(&store, "u1", "Go", &[1.0, 0.0]).await;
        let b = node(&store, "u1", "Discord", &[0.0, 1.0]).await;
        store
            .edge_insert("u1", &a.id, &b.id, "used_with", 1.0, &serde_json::json!({}))
            .await
            .unwrap();

        assert!(store.node_delete("u1", &a.id).await.unwrap());
        let edges = store.edges_list("u1", None, None, 10).await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn find_path_returns_shortest_route() {
        let store = Store::open_in_memory().unwrap();
        let a = node(&store, "u1", "A", &[1.0]).await;
        let b = node(&store, "u1", "B", &[1.0]).await;
        let c = node(&store, "u1", "C", &[1.0]).await;
        for (src, dst) in [(&a, &b), (&b, &c), (&a, &c)] {
            store
                .edge_insert("u1", &src.id, &dst.id, "rel", 1.0, &serde_json::json!({}))
                .await
                .unwrap();
        }

        let path = store
            .find_path("u1", &a.id, &c.id, 3, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, vec![a.id.clone(), c.id.clone()]);
    }

    #[tokio::test]
    async fn find_path_stays_inside_partition() {
        let store = Store::open_in_memory().unwrap();
        let a = node(&store, "u1", "A", &[1.0]).await;
        let c = node(&store, "u2", "C", &[1.0]).await;
        assert!(store
            .find_path("u1", &a.id, &c.id, 5, None)
            .await
            .unwrap()
            .is_none());
        // Unowned source cannot even seed the walk.
        assert!(store
            .find_path("u1", &c.id, &a.id, 5, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_path_respects_edge_type_filter() {
        let store = Store::open_in_memory().unwrap();
        let a = node(&store, "u1", "A", &[1.0]).await;
        let b = node(&store, "u1", "B", &[1.0]).await;
        store
            .edge_insert("u1", &a.id, &b.id, "dislikes", 1.0, &serde_json::json!({}))
            .await
            .unwrap();

        let filtered = store
            .find_path("u1", &a.id, &b.id, 3, Some(&["likes".to_string()]))
            .await
            .unwrap();
        assert!(filtered.is_none());
    }

    #[tokio::test]
    async fn neighbors_both_directions() {
        let store = Store::open_in_memory().unwrap();
        let hub = node(&store, "u1", "Hub", &[1.0]).await;
        let upstream = node(&store, "u1", "Up", &[1.0]).await;
        let downstream = node(&store, "u1", "Down", &[1.0]).await;
        store
            .edge_insert("u1", &upstream.id, &hub.id, "feeds", 1.0, &serde_json::json!({}))
            .await
            .unwrap();
        store
            .edge_insert("u1", &hub.id, &downstream.id, "feeds", 1.0, &serde_json::json!({}))
            .await
            .unwrap();

        let out = store
            .neighbors("u1", &hub.id, Direction::Out, None)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "Down");

        let both = store
            .neighbors("u1", &hub.id, Direction::Both, None)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let store = Store::open_in_memory().unwrap();
        node(&store, "u1", "close", &[1.0, 0.05]).await;
        node(&store, "u1", "far", &[0.0, 1.0]).await;

        let hits = store
            .nodes_search("u1", &[1.0, 0.0], None, 0.3, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.label, "close");
    }
}
