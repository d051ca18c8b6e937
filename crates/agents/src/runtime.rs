//! Shared machinery behind every agent variant.
//!
//! Variants differ in profile (temperature, instructions, output cap) and in
//! post-processing; prompt assembly, lifecycle state, and streaming all live
//! here so each variant file stays a thin configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use murmur_common::{
    AgentKind, AgentProfile, ChatRole, ChatTurn, ChunkStream, MemoryHints, MurmurError, Result,
};
use murmur_llm::{ChatMessage, LlmClient, LlmRequest, Role};

pub(crate) struct AgentRuntime {
    pub(crate) kind: AgentKind,
    pub(crate) profile: AgentProfile,
    pub(crate) llm: Arc<dyn LlmClient>,
    running: AtomicBool,
}

fn role_for(turn: &ChatTurn) -> Role {
    match turn.role {
        ChatRole::User => Role::User,
        ChatRole::Assistant => Role::Assistant,
        ChatRole::System => Role::System,
    }
}

impl AgentRuntime {
    pub(crate) fn new(kind: AgentKind, profile: AgentProfile, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            kind,
            profile,
            llm,
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(agent = %self.profile.id, "Agent started");
        }
    }

    pub(crate) fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(agent = %self.profile.id, "Agent stopped");
        }
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MurmurError::llm_permanent(format!(
                "agent {} is not running",
                self.profile.id
            )));
        }
        Ok(())
    }

    /// System prompt: variant instructions followed by memory context.
    pub(crate) fn build_system_prompt(&self, hints: &MemoryHints) -> String {
        let mut parts: Vec<String> = self.profile.instructions.clone();

        if !hints.is_empty() {
            parts.push("## Memory context".into());
            if !hints.core.is_empty() {
                let facts = hints
                    .core
                    .iter()
                    .map(|fact| format!("- {}: {}", fact.key, fact.value))
                    .collect::<Vec<_>>()
                    .join("\n");
                parts.push(format!("Known facts about this user:\n{facts}"));
            }
            if !hints.recall.is_empty() {
                let snippets = hints
                    .recall
                    .iter()
                    .map(|hit| format!("- {}", hit.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                parts.push(format!("Related past conversation:\n{snippets}"));
            }
        }

        parts.join("\n\n")
    }

    pub(crate) fn build_request(
        &self,
        message: &str,
        context: &[ChatTurn],
        hints: &MemoryHints,
    ) -> LlmRequest {
        let mut messages: Vec<ChatMessage> = context
            .iter()
            .filter(|turn| turn.role != ChatRole::System)
            .map(|turn| ChatMessage {
                role: role_for(turn),
                content: turn.content.clone(),
            })
            .collect();
        messages.push(ChatMessage::user(message));

        LlmRequest {
            system_prompt: Some(self.build_system_prompt(hints)),
            messages,
            temperature: Some(self.profile.temperature),
            max_tokens: Some(self.profile.max_tokens),
        }
    }

    /// Stream a response for the assembled request.
    pub(crate) async fn stream(
        &self,
        message: &str,
        context: &[ChatTurn],
        hints: &MemoryHints,
    ) -> Result<ChunkStream> {
        self.ensure_running()?;
        let request = self.build_request(message, context, hints);
        debug!(
            agent = %self.profile.id,
            context_turns = context.len(),
            sources = hints.sources_count(),
            "Dispatching to LLM"
        );
        self.llm.stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_common::{CoreHint, RecallHint};
    use murmur_llm::LlmResponse;

    struct EchoClient;

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content: request.messages.last().unwrap().content.clone(),
                model: "echo".into(),
                usage: None,
                finish_reason: None,
            })
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0])
        }
        fn model_name(&self) -> &str {
            "echo"
        }
        fn embedding_model(&self) -> &str {
            "echo-embed"
        }
    }

    fn runtime() -> AgentRuntime {
        let profile = AgentProfile::new("agent_test", "Test", 0.7)
            .with_instructions(vec!["You are concise.".into()]);
        AgentRuntime::new(AgentKind::Conversational, profile, Arc::new(EchoClient))
    }

    #[test]
    fn system_prompt_includes_memory_hints() {
        let runtime = runtime();
        let hints = MemoryHints {
            core: vec![CoreHint {
                key: "timezone".into(),
                value: "America/Sao_Paulo".into(),
            }],
            recall: vec![RecallHint {
                content: "asked about rust traits".into(),
                similarity: 0.9,
            }],
        };

        let prompt = runtime.build_system_prompt(&hints);
        assert!(prompt.contains("You are concise."));
        assert!(prompt.contains("timezone: America/Sao_Paulo"));
        assert!(prompt.contains("asked about rust traits"));
    }

    #[test]
    fn system_turns_are_not_duplicated_into_messages() {
        let runtime = runtime();
        let context = vec![
            ChatTurn::system("injected earlier"),
            ChatTurn::user("hi"),
            ChatTurn::assistant("hello"),
        ];
        let request = runtime.build_request("next", &context, &MemoryHints::default());
        assert_eq!(request.messages.len(), 3);
        assert!(request
            .messages
            .iter()
            .all(|m| !matches!(m.role, Role::System)));
    }

    #[tokio::test]
    async fn stream_requires_started_agent() {
        let runtime = runtime();
        let err = runtime
            .stream("hello", &[], &MemoryHints::default())
            .await
            .err()
            .unwrap();
        assert!(!err.is_transient());

        runtime.start();
        assert!(runtime
            .stream("hello", &[], &MemoryHints::default())
            .await
            .is_ok());
    }
}
