//! SQLite-backed store adapter.
//!
//! The sole surface that touches persistent storage: every query in the
//! repository lives in this crate, parameterized against injection. The
//! connection sits behind an async mutex with scoped acquisition, so the
//! guard is released on all exit paths and queries against one connection
//! are serialized. Multi-table mutations (archival compression,
//! session-with-messages writes) run inside transactions.

mod archival;
mod core;
mod graph;
mod recall;
mod schema;
mod session;
pub mod types;
pub mod vector;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use murmur_common::{MurmurError, Result};

pub use graph::Direction;
pub use types::{
    ArchivalRow, CompressionOutcome, CoreFactRow, EdgeRow, GraphCounts, MessageRow, MessageStatus,
    NodeHit, NodeRow, RecallHit, RecallRow,
};
pub use vector::{cosine_similarity, decode_embedding, encode_embedding};

/// The store adapter. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    closed: Arc<AtomicBool>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(map_store_err)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "Opened store");
        Ok(store)
    }

    /// Open an in-memory database. Used by tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_store_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_store_err)?;
        conn.execute_batch(schema::SCHEMA).map_err(map_store_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Close the store. Idempotent; later operations fail with
    /// `StoreUnavailable`.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Hold the lock once so in-flight queries drain first.
            let _guard = self.conn.lock().await;
            debug!("Store closed");
        }
    }

    /// Scoped acquisition of the connection; the guard releases on all exit
    /// paths.
    pub(crate) async fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MurmurError::StoreUnavailable("store is closed".into()));
        }
        Ok(self.conn.lock().await)
    }
}

/// Map a SQLite failure into the adapter's error taxonomy: constraint
/// violations are conflicts, everything else is a dependency problem.
pub(crate) fn map_store_err(err: rusqlite::Error) -> MurmurError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            MurmurError::StoreConflict(err.to_string())
        }
        _ => MurmurError::StoreUnavailable(err.to_string()),
    }
}

/// UTC timestamp in the canonical storage format.
pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fresh entity id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
