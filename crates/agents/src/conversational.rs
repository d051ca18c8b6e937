//! Conversational agent - general chat and anything unrouted.

use std::sync::Arc;

use async_trait::async_trait;

use murmur_common::{
    Agent, AgentKind, AgentProfile, ChatTurn, ChunkStream, MemoryHints, Result,
};
use murmur_llm::LlmClient;

use crate::runtime::AgentRuntime;

const SYSTEM_PROMPT: &str = "You are the main conversational agent. \
Respond naturally, stay friendly and useful, and keep answers concise. \
When memory context is provided, weave it in without quoting it back verbatim.";

pub struct ConversationalAgent {
    runtime: AgentRuntime,
}

impl ConversationalAgent {
    pub fn new(llm: Arc<dyn LlmClient>, personality: Vec<String>) -> Self {
        let mut instructions = personality;
        instructions.push(SYSTEM_PROMPT.into());
        let profile = AgentProfile::new("agent_conversational", "Conversational", 0.7)
            .with_instructions(instructions);
        Self {
            runtime: AgentRuntime::new(AgentKind::Conversational, profile, llm),
        }
    }
}

#[async_trait]
impl Agent for ConversationalAgent {
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
