//! Knowledge agent - answers grounded in retrieved memory.

use std::sync::Arc;

use async_trait::async_trait;

use murmur_common::{
    Agent, AgentKind, AgentProfile, ChatTurn, ChunkStream, MemoryHints, Result,
};
use murmur_llm::LlmClient;

use crate::runtime::AgentRuntime;

const SYSTEM_PROMPT: &str = "You are the knowledge agent. \
Answer questions from the retrieved context in the memory section. \
Prefer retrieved facts over general knowledge and say so when the context \
does not cover the question. Cite which remembered item supports a claim \
when you can.";

pub struct KnowledgeAgent {
    runtime: AgentRuntime,
}

impl KnowledgeAgent {
    pub fn new(llm: Arc<dyn LlmClient>, personality: Vec<String>) -> Self {
        let mut instructions = personality;
        instructions.push(SYSTEM_PROMPT.into());
        let profile = AgentProfile::new("agent_knowledge", "Knowledge", 0.3)
            .with_instructions(instructions);
        Self {
            runtime: AgentRuntime::new(AgentKind::Knowledge, profile, llm),
        }
    }
}

#[async_trait]
impl Agent for KnowledgeAgent {
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
