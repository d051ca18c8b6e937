//! Typed queries for the `core_memories` table.

use rusqlite::params;

use murmur_common::Result;

use crate::types::CoreFactRow;
use crate::{map_store_err, new_id, now_ts, Store};

const CORE_COLUMNS: &str = "id, user_id, key, value, importance, metadata, \
                            access_count, last_accessed, created_at, updated_at";

impl Store {
    /// Insert or update a keyed fact. Re-storing an existing key updates it
    /// in place; metadata from the new write is merged over the old.
    pub async fn core_upsert(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
        importance: f64,
        metadata: &serde_json::Value,
    ) -> Result<CoreFactRow> {
        let conn = self.conn().await?;
        let sql = format!(
            "INSERT INTO core_memories \
                 (id, user_id, key, value, importance, metadata, access_count, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7) \
             ON CONFLICT (user_id, key) DO UPDATE SET \
                 value = excluded.value, \
                 importance = excluded.importance, \
                 metadata = json_patch(core_memories.metadata, excluded.metadata), \
                 updated_at = excluded.updated_at \
             RETURNING {CORE_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                new_id(),
                user_id,
                key,
                value,
                importance,
                metadata.to_string(),
                now_ts(),
            ],
            CoreFactRow::from_row,
        )
        .map_err(map_store_err)
    }

    /// All facts for a user, most important and most recently used first.
    pub async fn core_list(&self, user_id: &str, limit: usize) -> Result<Vec<CoreFactRow>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {CORE_COLUMNS} FROM core_memories \
             WHERE user_id = ?1 \
             ORDER BY importance DESC, last_accessed DESC NULLS LAST \
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], CoreFactRow::from_row)
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;
        Ok(rows)
    }

    /// Delete one fact. Returns whether a row was removed.
    pub async fn core_delete(&self, user_id: &str, key: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "DELETE FROM core_memories WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
            )
            .map_err(map_store_err)?;
        Ok(affected > 0)
    }

    /// Bump access counters for a batch of keys in a single statement.
    /// The access trigger refreshes `last_accessed`.
    pub async fn core_bump_access(&self, user_id: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let conn = self.conn().await?;
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "UPDATE core_memories SET access_count = access_count + 1 \
             WHERE user_id = ? AND key IN ({placeholders})"
        );
        let values: Vec<&str> = std::iter::once(user_id)
            .chain(keys.iter().map(String::as_str))
            .collect();
        conn.execute(&sql, rusqlite::params_from_iter(values))
            .map_err(map_store_err)?;
        Ok(())
    }

    /// Remove every fact for a user. Returns how many rows were removed.
    pub async fn core_clear(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM core_memories WHERE user_id = ?1",
            params![user_id],
        )
        .map_err(map_store_err)
    }

    pub async fn core_count(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT COUNT(*) FROM core_memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(map_store_err)
    }
}
