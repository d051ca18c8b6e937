//! Typed queries for the `sessions` and `messages` tables.
//!
//! A conversation exchange (user message + assistant response) is always
//! written in one transaction so the log never holds half an exchange.

use rusqlite::{params, Transaction};

use murmur_common::Result;

use crate::types::{MessageRow, MessageStatus};
use crate::{map_store_err, new_id, now_ts, Store};

const MESSAGE_COLUMNS: &str = "id, session_id, user_id, role, content, status, seq, created_at";

fn upsert_session(tx: &Transaction, user_id: &str, channel_id: &str) -> rusqlite::Result<String> {
    tx.query_row(
        "INSERT INTO sessions (id, user_id, channel_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT (user_id, channel_id) DO UPDATE SET updated_at = excluded.updated_at \
         RETURNING id",
        params![new_id(), user_id, channel_id, now_ts()],
        |row| row.get(0),
    )
}

fn next_seq(tx: &Transaction, session_id: &str) -> rusqlite::Result<i64> {
    tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM messages WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )
}

fn insert_message(
    tx: &Transaction,
    session_id: &str,
    user_id: &str,
    role: &str,
    content: &str,
    status: &str,
    seq: i64,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO messages (id, session_id, user_id, role, content, status, seq, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![new_id(), session_id, user_id, role, content, status, seq, now_ts()],
    )?;
    Ok(())
}

impl Store {
    /// Persist one user/assistant exchange atomically, creating the session
    /// on first use. Returns the session id.
    pub async fn session_append_exchange(
        &self,
        user_id: &str,
        channel_id: &str,
        user_text: &str,
        assistant_text: &str,
        status: MessageStatus,
    ) -> Result<String> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().map_err(map_store_err)?;

        let session_id = upsert_session(&tx, user_id, channel_id).map_err(map_store_err)?;
        let base = next_seq(&tx, &session_id).map_err(map_store_err)?;
        insert_message(
            &tx,
            &session_id,
            user_id,
            "user",
            user_text,
            MessageStatus::Complete.as_str(),
            base + 1,
        )
        .map_err(map_store_err)?;
        insert_message(
            &tx,
            &session_id,
            user_id,
            "assistant",
            assistant_text,
            status.as_str(),
            base + 2,
        )
        .map_err(map_store_err)?;

        tx.commit().map_err(map_store_err)?;
        Ok(session_id)
    }

    /// Recent history for a user/channel pair, in chronological order.
    pub async fn session_history(
        &self,
        user_id: &str,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRow>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM ( \
                 SELECT m.id, m.session_id, m.user_id, m.role, m.content, m.status, m.seq, m.created_at \
                 FROM messages m \
                 JOIN sessions s ON s.id = m.session_id \
                 WHERE s.user_id = ?1 AND s.channel_id = ?2 \
                 ORDER BY m.seq DESC \
                 LIMIT ?3 \
             ) ORDER BY seq ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_store_err)?;
        let rows = stmt
            .query_map(params![user_id, channel_id, limit as i64], MessageRow::from_row)
            .map_err(map_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_store_err)?;
        Ok(rows)
    }

    /// Total persisted messages for a user across all sessions.
    pub async fn message_count(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(map_store_err)
    }
}
