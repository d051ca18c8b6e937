//! Row types returned by the store adapter.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::vector::decode_embedding;

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(parse_ts)
}

fn parse_json(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or_default()
}

/// One keyed fact in core memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreFactRow {
    pub id: String,
    pub user_id: String,
    pub key: String,
    pub value: String,
    pub importance: f64,
    pub metadata: serde_json::Value,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoreFactRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            key: row.get(2)?,
            value: row.get(3)?,
            importance: row.get(4)?,
            metadata: parse_json(row.get(5)?),
            access_count: row.get(6)?,
            last_accessed: parse_opt_ts(row.get(7)?),
            created_at: parse_ts(row.get(8)?),
            updated_at: parse_ts(row.get(9)?),
        })
    }
}

/// One item in the append-only recall log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallRow {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub importance: f64,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecallRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            content: row.get(2)?,
            importance: row.get(3)?,
            access_count: row.get(4)?,
            last_accessed: parse_opt_ts(row.get(5)?),
            created_at: parse_ts(row.get(6)?),
            updated_at: parse_ts(row.get(7)?),
        })
    }
}

/// A recall row paired with its similarity to a query embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    pub row: RecallRow,
    pub similarity: f32,
}

/// One archival item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalRow {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub source: String,
    pub metadata: serde_json::Value,
    pub session_id: Option<String>,
    pub compressed: bool,
    pub compressed_into_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArchivalRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            content: row.get(2)?,
            source: row.get(3)?,
            metadata: parse_json(row.get(4)?),
            session_id: row.get(5)?,
            compressed: row.get::<_, i64>(6)? != 0,
            compressed_into_id: row.get(7)?,
            created_at: parse_ts(row.get(8)?),
            updated_at: parse_ts(row.get(9)?),
        })
    }
}

/// Outcome of compressing one session's archival items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionOutcome {
    pub compressed_id: String,
    pub original_count: usize,
}

/// One node of a user's knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: String,
    pub user_id: String,
    pub label: String,
    pub node_type: Option<String>,
    pub properties: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let blob: Option<Vec<u8>> = row.get(5)?;
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            label: row.get(2)?,
            node_type: row.get(3)?,
            properties: parse_json(row.get(4)?),
            embedding: blob.as_deref().map(decode_embedding),
            created_at: parse_ts(row.get(6)?),
            updated_at: parse_ts(row.get(7)?),
        })
    }
}

/// A node paired with its similarity to a query embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHit {
    pub node: NodeRow,
    pub similarity: f32,
}

/// One edge of a user's knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRow {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    pub weight: f64,
    pub properties: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl EdgeRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            edge_type: row.get(3)?,
            weight: row.get(4)?,
            properties: parse_json(row.get(5)?),
            created_at: parse_ts(row.get(6)?),
        })
    }
}

/// Per-user graph counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphCounts {
    pub node_count: i64,
    pub edge_count: i64,
    pub type_count: i64,
}

/// Completion status of a persisted assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Complete,
    Partial,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
        }
    }
}

/// One persisted conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub status: String,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            status: row.get(5)?,
            seq: row.get(6)?,
            created_at: parse_ts(row.get(7)?),
        })
    }
}
