//! Graph agent - reasons over the user's knowledge graph.

use std::sync::Arc;

use async_trait::async_trait;

use murmur_common::{
    Agent, AgentKind, AgentProfile, ChatTurn, ChunkStream, MemoryHints, Result,
};
use murmur_llm::LlmClient;

use crate::runtime::AgentRuntime;

const SYSTEM_PROMPT: &str = "You are the knowledge-graph agent. \
Concepts are nodes connected by typed, weighted relationships. Use the graph \
context in the memory section to explain how entities relate, and keep the \
relationship vocabulary of the graph when describing connections.";

pub struct GraphAgent {
    runtime: AgentRuntime,
}

impl GraphAgent {
    pub fn new(llm: Arc<dyn LlmClient>, personality: Vec<String>) -> Self {
        let mut instructions = personality;
        instructions.push(SYSTEM_PROMPT.into());
        let profile =
            AgentProfile::new("agent_graph", "Graph", 0.3).with_instructions(instructions);
        Self {
            runtime: AgentRuntime::new(AgentKind::Graph, profile, llm),
        }
    }
}

#[async_trait]
impl Agent for GraphAgent {
    fn id(&self) -> &str {
        &self.runtime.profile.id
    }

    fn kind(&self) -> AgentKind {
        self.runtime.kind
    }

    fn profile(&self) -> &AgentProfile {
        &self.runtime.profile
    }

    async fn process(
        &self,
        message: &str,
        context: &[ChatTurn],
        hints: &MemoryHints,
    ) -> Result<ChunkStream> {
        self.runtime.stream(message, context, hints).await
    }

    async fn start(&self) -> Result<()> {
        self.runtime.start();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.runtime.stop();
        Ok(())
    }
}
