//! Typed queries for the `archival_memories` table.
//!
//! Compression is the one multi-statement mutation here and always runs in a
//! transaction: summary insert and source marking commit together or not at
//! all.

use rusqlite::params;

use murmur_common::{MurmurError, Result};

use crate::types::{ArchivalRow, CompressionOutcome};
use crate::{map_store_err, new_id, now_ts, Store};

const ARCHIVAL_COLUMNS: &str = "id, user_id, content, source, metadata, session_id, \
                                compressed, compressed_into_id, created_at, updated_at";

/// Source tag attached to generated compression summaries.
const COMPRESSION_SOURCE: &str = "compression";

/// Per-item excerpt length in a generated fallback summary.
const SUMMARY_EXCERPT_CHARS: usize = 200;

/// Upper bound on a generated fallback summary.
const SUMMARY_MAX_CHARS: usize = 5000;

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

impl Store {
    pub async fn archival_insert(
        &self,
        user_id: &str,
        content: &str,
        source: &str,
        metadata: &serde_json::Value,
        session_id: Option<&str>,
    ) -> Result<ArchivalRow> {
        let conn = self.conn().await?;
        let sql = format!(
            "INSERT INTO archival_memories \
                 (id, user_id, content, source, metadata, session_id, compressed, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7) \
             RETURNING {ARCHIVAL_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                new_id(),
                user_id,
                content,
                source,
                metadata.to_string(),
                session_id,
                now_ts(),
            ],
            ArchivalRow::from_row,
        )
        .map_err(map_store_err)
    }

    /// Compress every uncompressed item of a session into a single summary
    /// item, atomically: select, summary insert, and source marking either
    /// all commit or none do.
    pub async fn archival_compress(
        &self,
        user_id: &str,
        session_id: &str,
        summary: Option<String>,
    ) -> Result<Option<CompressionOutcome>> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().map_err(map_store_err)?;

        let sources: Vec<(String, String, serde_json::Value)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, content, metadata FROM archival_memories \
                     WHERE user_id = ?1 AND session_id = ?2 AND compressed = 0 \
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(map_store_err)?;
            let rows = stmt
                .query_map(params![user_id, session_id], |row| {
                    let metadata: String = row.get(2)?;
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        serde_json::from_str(&metadata).unwrap_or_default(),
                    ))
                })
                .map_err(map_store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_store_err)?;
            rows
        };

        if sources.is_empty() {
            return Ok(None);
        }

        let original_count = sources.len();
        let summary = summary.unwrap_or_else(|| {
            let joined = sources
                .iter()
                .map(|(_, content, metadata)| {
                    let source = metadata
                        .get("source")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    format!("[{source}] {}", truncate_chars(content, SUMMARY_EXCERPT_CHARS))
                })
                .collect::<Vec<_>>()
                .join(" | ");
            truncate_chars(&joined, SUMMARY_MAX_CHARS)
        });

        let compressed_id = new_id();
        let summary_metadata = serde_json::json!({
            "compressed_from_session": session_id,
            "original_count": original_count,
        });
        tx.execute(
            "INSERT INTO archival_memories \
                 (id, user_id, content, source, metadata, session_id, compressed, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            params![
                compressed_id,
                user_id,
                summary,
                COMPRESSION_SOURCE,
                summary_metadata.to_string(),
                session_id,
                now_ts(),
            ],
        )
        .map_err(map_store_err)?;

        let source_ids: Vec<String> = sources.into_iter().map(|(id, _, _)| id).collect();
        let placeholders = vec!["?"; source_ids.len()].join(", ");
        let sql = format!(
            "UPDATE archival_memories SET compressed = 1, compressed_into_id = ? \
             WHERE user_id = ? AND id IN ({placeholders})"
        );
        let values: Vec<&str> = [compressed_id.as_str(), user_id]
            .into_iter()
            .chain(source_ids.iter().map(String::as_str))
            .collect();
        tx.execute(&sql, rusqlite::params_from_iter(values))
            .map_err(map_store_err)?;

        tx.commit().map_err(map_store_err)?;
        Ok(Some(CompressionOutcome {
            compressed_id,
            original_count,
        }))
    }

    /// Metadata search. Dotted keys become JSON path arguments; both path and
    /// value are bound parameters, never interpolated.
    pub async fn archival_by_metadata(
        &self,
        user_id: &str,
        filters: &[(String, String)],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ArchivalRow>> {
        if filters.is_empty() {
            return Err(MurmurError::memory(
                "archival",
                "at least one metadata filter is required",
            ));
        }

        let mut clauses = Vec::with_capacity(filters.len());
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];
        for (key, value) in filters {
            let parts: Vec<&str> = key.split('.').collect();
            let valid = !parts.is_empty()
                && parts.iter().all(|part| {
                    !part.is_empty()
                        && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                });
            if !valid {
                return Err(MurmurError::memory(
                    "archival",
                    format!("invalid filter key path: {key}"),
                ));
            }
            clauses.push("CAST(json_extract(metadata, ?) AS TEXT) = ?".to_string());
            values.push(Box::new(format!("$.{}", parts.join("."))));
            values.push(Box::new(value.clone()));
        }
        values.push(Box::new(limit as i64));
        values.push(Box::new(offset as i64));

        let sql = format!(
            "SELECT {ARCHIVAL_COLUMNS} FROM archival_memories \
             WHERE user_id = ? AND {} \
             ORDER BY created_at DESC, id ASC \
             LIMIT ? OFFSET ?",
            clauses.join(" AND ")
        );

        let conn = self.conn().await?;
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt
            .query_map(refs.as_slice(), ArchivalRow::from_row)
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;
        Ok(rows)
    }

    /// Content search. `%`, `_` and the escape character itself are escaped
    /// and an explicit `ESCAPE` clause is used.
    pub async fn archival_by_content(
        &self,
        user_id: &str,
        query: &str,
        source: Option<&str>,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ArchivalRow>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");

        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {ARCHIVAL_COLUMNS} FROM archival_memories \
             WHERE user_id = ?1 \
               AND content LIKE ?2 ESCAPE '\\' \
               AND (?3 IS NULL OR source = ?3) \
               AND (?4 IS NULL OR session_id = ?4) \
             ORDER BY created_at DESC, id ASC \
             LIMIT ?5"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let rows = stmt
            .query_map(
                params![user_id, pattern, source, session_id, limit as i64],
                ArchivalRow::from_row,
            )
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;
        Ok(rows)
    }

    pub async fn archival_get(&self, user_id: &str, id: &str) -> Result<Option<ArchivalRow>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {ARCHIVAL_COLUMNS} FROM archival_memories WHERE id = ?1 AND user_id = ?2"
        );
        match conn.query_row(&sql, params![id, user_id], ArchivalRow::from_row) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(map_store_err(err)),
        }
    }

    /// Merge new metadata over the existing document.
    pub async fn archival_update_metadata(
        &self,
        user_id: &str,
        id: &str,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "UPDATE archival_memories SET metadata = json_patch(metadata, ?1) \
                 WHERE id = ?2 AND user_id = ?3",
                params![metadata.to_string(), id, user_id],
            )
            .map_err(map_store_err)?;
        Ok(affected > 0)
    }

    pub async fn archival_delete(&self, user_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "DELETE FROM archival_memories WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(map_store_err)?;
        Ok(affected > 0)
    }

    pub async fn archival_count(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT COUNT(*) FROM archival_memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(map_store_err)
    }

    pub async fn archival_session_memories(
        &self,
        user_id: &str,
        session_id: &str,
        include_compressed: bool,
        limit: usize,
    ) -> Result<Vec<ArchivalRow>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {ARCHIVAL_COLUMNS} FROM archival_memories \
             WHERE user_id = ?1 AND session_id = ?2 AND (?3 OR compressed = 0) \
             ORDER BY created_at ASC, id ASC \
             LIMIT ?4"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let rows = stmt
            .query_map(
                params![user_id, session_id, include_compressed, limit as i64],
                ArchivalRow::from_row,
            )
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;
        Ok(rows)
    }
}
