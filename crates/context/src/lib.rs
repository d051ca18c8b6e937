//! Session context engine for Murmur.
//!
//! Tracks a per-session token budget with a deterministic tokenizer, reduces
//! context when over budget (`full` / `compact` / `summary` modes), and
//! offloads low-priority messages into a bounded priority cache they can be
//! restored from on demand.

pub mod engine;
pub mod offload;
pub mod reducer;
pub mod types;

pub use engine::{ContextEngine, SessionStats};
pub use offload::{OffloadCache, OffloadKey, OffloadStats};
pub use reducer::ContextReducer;
pub use types::{ContentPart, ContextMessage, MessageContent, ReductionMode};
