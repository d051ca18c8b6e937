//! Database schema.
//!
//! Applied idempotently on open. All tables are partitioned by `user_id`;
//! triggers maintain `updated_at` and refresh `last_accessed` when access
//! counters change.

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS core_memories (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    key           TEXT NOT NULL,
    value         TEXT NOT NULL,
    importance    REAL NOT NULL DEFAULT 0.5,
    metadata      TEXT NOT NULL DEFAULT '{}',
    access_count  INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE (user_id, key)
);
CREATE INDEX IF NOT EXISTS idx_core_memories_user ON core_memories (user_id, key);

CREATE TABLE IF NOT EXISTS recall_memories (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    content       TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    importance    REAL NOT NULL DEFAULT 0.5,
    access_count  INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_recall_memories_user ON recall_memories (user_id);

CREATE TABLE IF NOT EXISTS archival_memories (
    id                 TEXT PRIMARY KEY,
    user_id            TEXT NOT NULL,
    content            TEXT NOT NULL,
    source             TEXT NOT NULL,
    metadata           TEXT NOT NULL DEFAULT '{}',
    session_id         TEXT,
    compressed         INTEGER NOT NULL DEFAULT 0,
    compressed_into_id TEXT REFERENCES archival_memories (id) ON DELETE SET NULL,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_archival_memories_user ON archival_memories (user_id);
CREATE INDEX IF NOT EXISTS idx_archival_memories_session
    ON archival_memories (session_id) WHERE session_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_archival_memories_compressed
    ON archival_memories (compressed) WHERE compressed = 1;

CREATE TABLE IF NOT EXISTS knowledge_nodes (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    label      TEXT NOT NULL,
    node_type  TEXT,
    properties TEXT NOT NULL DEFAULT '{}',
    embedding  BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_knowledge_nodes_user ON knowledge_nodes (user_id);

CREATE TABLE IF NOT EXISTS knowledge_edges (
    id         TEXT PRIMARY KEY,
    source_id  TEXT NOT NULL REFERENCES knowledge_nodes (id) ON DELETE CASCADE,
    target_id  TEXT NOT NULL REFERENCES knowledge_nodes (id) ON DELETE CASCADE,
    edge_type  TEXT NOT NULL,
    weight     REAL NOT NULL DEFAULT 1.0,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (source_id, target_id, edge_type)
);
CREATE INDEX IF NOT EXISTS idx_knowledge_edges_source ON knowledge_edges (source_id);
CREATE INDEX IF NOT EXISTS idx_knowledge_edges_target ON knowledge_edges (target_id);

CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_id, channel_id)
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id);

CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions (id) ON DELETE CASCADE,
    user_id    TEXT NOT NULL,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'complete',
    seq        INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, seq);

CREATE TRIGGER IF NOT EXISTS trg_core_memories_updated
AFTER UPDATE OF value, importance, metadata ON core_memories
BEGIN
    UPDATE core_memories
    SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_core_memories_accessed
AFTER UPDATE OF access_count ON core_memories
BEGIN
    UPDATE core_memories
    SET last_accessed = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_recall_memories_accessed
AFTER UPDATE OF access_count ON recall_memories
BEGIN
    UPDATE recall_memories
    SET last_accessed = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_archival_memories_updated
AFTER UPDATE OF content, metadata, compressed, compressed_into_id ON archival_memories
BEGIN
    UPDATE archival_memories
    SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_knowledge_nodes_updated
AFTER UPDATE OF label, node_type, properties, embedding ON knowledge_nodes
BEGIN
    UPDATE knowledge_nodes
    SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = NEW.id;
END;
"#;
