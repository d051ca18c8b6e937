//! Three-tier long-term memory for Murmur.
//!
//! - **Core**: keyed, bounded, importance-ranked facts with a write-through
//!   snapshot cache.
//! - **Recall**: append-only vector-indexed episodic log searched by cosine
//!   similarity.
//! - **Archival**: compressed long-form storage filtered by metadata.
//!
//! Every tier is partitioned per user; no operation can read or mutate
//! another user's rows.

pub mod archival;
pub mod core;
pub mod recall;
pub mod types;

pub use archival::ArchivalMemory;
pub use core::CoreMemory;
pub use recall::{RecallMemory, DEFAULT_SEARCH_LIMIT, DEFAULT_SEARCH_THRESHOLD};
pub use types::MemoryStats;

pub use murmur_store::{ArchivalRow, CompressionOutcome, CoreFactRow, RecallHit, RecallRow};
