//! Agent selection and canned-response routing.
//!
//! The `category → agent id` registry is validated at startup; referencing
//! an agent id that was never registered is a fatal configuration error.
//! Social categories are answered from fixed response pools without an LLM
//! round-trip, and `out_of_scope` has a single fixed reply.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use murmur_common::{Agent, MurmurError, Result};

use crate::triage::IntentCategory;

const GREETING_REPLIES: &[&str] = &[
    "Hello! How can I help you today?",
    "Hi there! What would you like to know?",
    "Hey! I'm here and listening.",
];

const FAREWELL_REPLIES: &[&str] = &[
    "Goodbye! Have a great day.",
    "See you later!",
    "Bye! Come back any time.",
];

const THANKS_REPLIES: &[&str] = &[
    "You're welcome!",
    "Happy to help!",
    "Anytime!",
];

const HELP_REPLY: &str = "I can answer questions, remember facts about you \
(\"remember that my timezone is UTC\"), recall them later (\"what's my \
timezone?\"), and reason over a knowledge graph of things you've taught me. \
Just ask in plain language.";

const STATUS_REPLY: &str = "All systems operational. Memory, graph, and \
language services are up.";

const OUT_OF_SCOPE_REPLY: &str = "That's outside what I can help with. I can \
chat, answer questions, and manage what you've asked me to remember.";

/// Maps intent categories to registered agents.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
    by_category: HashMap<IntentCategory, String>,
    fallback_id: String,
}

impl AgentRegistry {
    /// Build a registry. Every mapped agent id must be present in `agents`,
    /// as must the fallback; anything else is a startup `ConfigError`.
    pub fn new(
        agents: Vec<Arc<dyn Agent>>,
        mapping: Vec<(IntentCategory, String)>,
        fallback_id: impl Into<String>,
    ) -> Result<Self> {
        let agents: HashMap<String, Arc<dyn Agent>> = agents
            .into_iter()
            .map(|agent| (agent.id().to_string(), agent))
            .collect();

        let fallback_id = fallback_id.into();
        if !agents.contains_key(&fallback_id) {
            return Err(MurmurError::Config(format!(
                "fallback agent '{fallback_id}' is not registered"
            )));
        }

        let mut by_category = HashMap::new();
        for (category, agent_id) in mapping {
            if !agents.contains_key(&agent_id) {
                return Err(MurmurError::Config(format!(
                    "intent '{}' routes to unknown agent '{agent_id}'",
                    category.as_str()
                )));
            }
            by_category.insert(category, agent_id);
        }

        Ok(Self {
            agents,
            by_category,
            fallback_id,
        })
    }

    /// The default routing table over the standard agent set.
    pub fn default_mapping() -> Vec<(IntentCategory, String)> {
        vec![
            (IntentCategory::KnowledgeQuery, "agent_knowledge".into()),
            (IntentCategory::StudyQuery, "agent_study".into()),
            (IntentCategory::MemoryStore, "agent_memory".into()),
            (IntentCategory::MemoryRetrieve, "agent_memory".into()),
            (IntentCategory::GraphQuery, "agent_graph".into()),
            (IntentCategory::Chitchat, "agent_conversational".into()),
        ]
    }

    /// Resolve the agent for a category. `Unknown` and unmapped categories
    /// fall back to the conversational default.
    pub fn resolve(&self, category: IntentCategory) -> Arc<dyn Agent> {
        let agent_id = self
            .by_category
            .get(&category)
            .unwrap_or(&self.fallback_id);
        debug!(category = category.as_str(), agent = %agent_id, "Routed intent");
        Arc::clone(&self.agents[agent_id])
    }

    pub fn agents(&self) -> Vec<Arc<dyn Agent>> {
        self.agents.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Canned reply for the social categories, picked deterministically from the
/// message text so the same input gets the same reply. Returns None for
/// categories that need an agent.
pub fn canned_reply(category: IntentCategory, text: &str) -> Option<&'static str> {
    let pick = |pool: &'static [&'static str]| {
        let seed = text.len() + text.chars().map(|c| c as usize).sum::<usize>();
        pool[seed % pool.len()]
    };

    match category {
        IntentCategory::Greeting => Some(pick(GREETING_REPLIES)),
        IntentCategory::Farewell => Some(pick(FAREWELL_REPLIES)),
        IntentCategory::Thanks => Some(pick(THANKS_REPLIES)),
        IntentCategory::Help => Some(HELP_REPLY),
        IntentCategory::Status => Some(STATUS_REPLY),
        IntentCategory::OutOfScope => Some(OUT_OF_SCOPE_REPLY),
        _ => None,
    }
}

/// The canned help reply used for empty messages.
pub fn help_reply() -> &'static str {
    HELP_REPLY
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_common::{AgentKind, AgentProfile, ChatTurn, ChunkStream, MemoryHints};

    struct StubAgent {
        profile: AgentProfile,
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn id(&self) -> &str {
            &self.profile.id
        }
        fn kind(&self) -> AgentKind {
            AgentKind::Conversational
        }
        fn profile(&self) -> &AgentProfile {
            &self.profile
        }
        async fn process(
            &self,
            _message: &str,
            _context: &[ChatTurn],
            _hints: &MemoryHints,
        ) -> Result<ChunkStream> {
            unreachable!("routing tests never process")
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn stub(id: &str) -> Arc<dyn Agent> {
        Arc::new(StubAgent {
            profile: AgentProfile::new(id, id, 0.5),
        })
    }

    fn standard_agents() -> Vec<Arc<dyn Agent>> {
        vec![
            stub("agent_conversational"),
            stub("agent_knowledge"),
            stub("agent_memory"),
            stub("agent_graph"),
            stub("agent_study"),
        ]
    }

    #[test]
    fn known_categories_route_to_mapped_agents() {
        let registry = AgentRegistry::new(
            standard_agents(),
            AgentRegistry::default_mapping(),
            "agent_conversational",
        )
        .unwrap();

        assert_eq!(
            registry.resolve(IntentCategory::MemoryStore).id(),
            "agent_memory"
        );
        assert_eq!(
            registry.resolve(IntentCategory::KnowledgeQuery).id(),
            "agent_knowledge"
        );
        assert_eq!(
            registry.resolve(IntentCategory::StudyQuery).id(),
            "agent_study"
        );
    }

    #[test]
    fn unknown_falls_back_to_conversational() {
        let registry = AgentRegistry::new(
            standard_agents(),
            AgentRegistry::default_mapping(),
            "agent_conversational",
        )
        .unwrap();
        assert_eq!(
            registry.resolve(IntentCategory::Unknown).id(),
            "agent_conversational"
        );
    }

    #[test]
    fn unknown_agent_id_is_a_fatal_config_error() {
        let result = AgentRegistry::new(
            standard_agents(),
            vec![(IntentCategory::GraphQuery, "agent_missing".into())],
            "agent_conversational",
        );
        assert!(matches!(result, Err(MurmurError::Config(_))));
    }

    #[test]
    fn missing_fallback_is_a_fatal_config_error() {
        let result = AgentRegistry::new(standard_agents(), vec![], "agent_missing");
        assert!(matches!(result, Err(MurmurError::Config(_))));
    }

    #[test]
    fn canned_replies_are_deterministic_per_text() {
        let a = canned_reply(IntentCategory::Greeting, "hi").unwrap();
        let b = canned_reply(IntentCategory::Greeting, "hi").unwrap();
        assert_eq!(a, b);

        assert!(canned_reply(IntentCategory::KnowledgeQuery, "x").is_none());
        assert!(canned_reply(IntentCategory::OutOfScope, "anything").is_some());
    }
}
