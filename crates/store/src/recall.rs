//! Typed queries for the `recall_memories` table.
//!
//! Similarity ranking runs over the caller's partition only; rows from other
//! users are never considered, let alone returned.

use rusqlite::params;

use murmur_common::Result;

use crate::types::{RecallHit, RecallRow};
use crate::vector::{cosine_similarity, decode_embedding, encode_embedding};
use crate::{map_store_err, new_id, now_ts, Store};

const RECALL_COLUMNS: &str = "id, user_id, content, importance, access_count, \
                              last_accessed, created_at, updated_at";

impl Store {
    pub async fn recall_insert(
        &self,
        user_id: &str,
        content: &str,
        embedding: &[f32],
        importance: f64,
    ) -> Result<RecallRow> {
        let conn = self.conn().await?;
        let sql = format!(
            "INSERT INTO recall_memories \
                 (id, user_id, content, embedding, importance, access_count, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6) \
             RETURNING {RECALL_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                new_id(),
                user_id,
                content,
                encode_embedding(embedding),
                importance,
                now_ts(),
            ],
            RecallRow::from_row,
        )
        .map_err(map_store_err)
    }

    /// Nearest-neighbor search within the user's partition.
    ///
    /// Results are ordered by cosine similarity descending with primary key
    /// ascending as the tie-break; rows below `threshold` or under
    /// `min_importance` are omitted.
    pub async fn recall_search(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        min_importance: f64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<RecallHit>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {RECALL_COLUMNS}, embedding FROM recall_memories \
             WHERE user_id = ?1 AND importance >= ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let scored = stmt
            .query_map(params![user_id, min_importance], |row| {
                let parsed = RecallRow::from_row(row)?;
                let blob: Vec<u8> = row.get(8)?;
                Ok((parsed, blob))
            })
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;

        let mut hits: Vec<RecallHit> = scored
            .into_iter()
            .map(|(row, blob)| {
                let similarity = cosine_similarity(query_embedding, &decode_embedding(&blob));
                RecallHit { row, similarity }
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.row.id.cmp(&b.row.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn recall_get(&self, user_id: &str, id: &str) -> Result<Option<RecallRow>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {RECALL_COLUMNS} FROM recall_memories WHERE id = ?1 AND user_id = ?2"
        );
        match conn.query_row(&sql, params![id, user_id], RecallRow::from_row) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(map_store_err(err)),
        }
    }

    /// Bump access counters for every matched row in one statement.
    pub async fn recall_bump_access(&self, user_id: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn().await?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE recall_memories SET access_count = access_count + 1 \
             WHERE user_id = ? AND id IN ({placeholders})"
        );
        let values: Vec<&str> = std::iter::once(user_id)
            .chain(ids.iter().map(String::as_str))
            .collect();
        conn.execute(&sql, rusqlite::params_from_iter(values))
            .map_err(map_store_err)?;
        Ok(())
    }

    pub async fn recall_update_importance(
        &self,
        user_id: &str,
        id: &str,
        importance: f64,
    ) -> Result<bool> {
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "UPDATE recall_memories SET importance = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND user_id = ?4",
                params![importance, now_ts(), id, user_id],
            )
            .map_err(map_store_err)?;
        Ok(affected > 0)
    }

    /// Delete requires ownership; a foreign id under another user is a no-op.
    pub async fn recall_delete(&self, user_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "DELETE FROM recall_memories WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(map_store_err)?;
        Ok(affected > 0)
    }

    pub async fn recall_count(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT COUNT(*) FROM recall_memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(map_store_err)
    }
}
