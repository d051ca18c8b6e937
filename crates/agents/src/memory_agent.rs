//! Memory agent - acknowledges stores and answers retrievals.

use std::sync::Arc;

use async_trait::async_trait;

use murmur_common::{
    Agent, AgentKind, AgentProfile, ChatTurn, ChunkStream, MemoryHints, Result,
};
use murmur_llm::LlmClient;

use crate::runtime::AgentRuntime;

const SYSTEM_PROMPT: &str = "You are the memory agent. \
The user is storing or retrieving personal facts. For a store, confirm \
briefly what was remembered. For a retrieval, answer directly from the known \
facts in the memory section; if the fact is not there, say you do not have \
it remembered rather than guessing.";

pub struct MemoryAgent {
    runtime: AgentRuntime,
}

impl MemoryAgent {
    pub fn new(llm: Arc<dyn LlmClient>, personality: Vec<String>) -> Self {
        let mut instructions = personality;
        instructions.push(SYSTEM_PROMPT.into());
        let profile =
            AgentProfile::new("agent_memory", "Memory", 0.2).with_instructions(instructions);
        Self {
            runtime: AgentRuntime::new(AgentKind::Memory, profile, llm),
        }
    }
}

#[async_trait]
impl Agent for MemoryAgent {
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
