//! Agent runtime for Murmur.
//!
//! Five variants of one shared contract, not an inheritance chain:
//!
//! - **Conversational** - general chat, temperature 0.7
//! - **Knowledge** - retrieval-grounded answers, temperature 0.3
//! - **Memory** - store/retrieve acknowledgements, temperature 0.2
//! - **Graph** - knowledge-graph reasoning, temperature 0.3
//! - **Study** - deterministic citation-validated QA, temperature 0.0
//!
//! All variants run over the same LLM client and cap output tokens. Lifecycle
//! operations run in parallel and aggregate failures without masking any
//! single one.

pub mod citation;
pub mod conversational;
pub mod graph_agent;
pub mod knowledge;
pub mod lifecycle;
pub mod memory_agent;
mod runtime;
pub mod study;

pub use citation::{CitationValidator, ValidationReport};
pub use conversational::ConversationalAgent;
pub use graph_agent::GraphAgent;
pub use knowledge::KnowledgeAgent;
pub use lifecycle::{start_all, stop_all};
pub use memory_agent::MemoryAgent;
pub use study::StudyAgent;
