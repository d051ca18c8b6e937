//! Study agent - deterministic, citation-validated QA over retrieved sources.
//!
//! Runs at temperature zero and buffers the whole completion so citations
//! can be checked before anything reaches the user. A response whose
//! citations cannot be resolved against the retrieved sources is replaced by
//! an explicit refusal.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use murmur_common::{
    Agent, AgentKind, AgentProfile, ChatTurn, ChunkStream, MemoryHints, Result,
};
use murmur_llm::LlmClient;

use crate::citation::CitationValidator;
use crate::runtime::AgentRuntime;

const SYSTEM_PROMPT: &str = "You are the study agent for retrieval-grounded \
question answering. Answer ONLY from the numbered sources provided in the \
memory section. Cite every factual assertion with the bracketed number of \
its supporting source, like [1]. If the sources do not answer the question, \
say so plainly instead of speculating.";

const REFUSAL: &str = "I can't answer that reliably: the response referenced \
sources that are not in the retrieved material, so I'm withholding it rather \
than risk fabricated citations.";

pub struct StudyAgent {
    runtime: AgentRuntime,
    validator: CitationValidator,
}

impl StudyAgent {
    pub fn new(llm: Arc<dyn LlmClient>, personality: Vec<String>) -> Self {
        let mut instructions = personality;
        instructions.push(SYSTEM_PROMPT.into());
        let profile = AgentProfile::new("agent_study", "Study", 0.0)
            .with_instructions(instructions)
            .with_max_tokens(1024);
        Self {
            runtime: AgentRuntime::new(AgentKind::Study, profile, llm),
            validator: CitationValidator::new(),
        }
    }

    /// Rewrite hints so each recall snippet carries its source number.
    fn numbered_hints(hints: &MemoryHints) -> MemoryHints {
        let mut numbered = hints.clone();
        for (index, hit) in numbered.recall.iter_mut().enumerate() {
            hit.content = format!("[{}] {}", index + 1, hit.content);
        }
        numbered
    }
}

#[async_trait]
impl Agent for StudyAgent {
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
        self.runtime.ensure_running()?;

        let numbered = Self::numbered_hints(hints);
        let request = self.runtime.build_request(message, context, &numbered);
        let response = self.runtime.llm.complete(request).await?;

        let report = self.validator.validate(&response.content, hints.recall.len());
        let text = if report.is_valid {
            response.content
        } else {
            warn!(
                invalid = ?report.invalid_citations,
                sources = report.source_count,
                "Refusing response with unresolvable citations"
            );
            REFUSAL.to_string()
        };

        Ok(futures::stream::once(async move { Ok(text) }).boxed())
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

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_common::RecallHint;
    use murmur_llm::{LlmRequest, LlmResponse};

    /// Replies with a fixed script regardless of the request.
    struct ScriptedClient {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content: self.reply.clone(),
                model: "scripted".into(),
                usage: None,
                finish_reason: Some("stop".into()),
            })
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0])
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn embedding_model(&self) -> &str {
            "scripted-embed"
        }
    }

    fn hints(count: usize) -> MemoryHints {
        MemoryHints {
            core: vec![],
            recall: (0..count)
                .map(|i| RecallHint {
                    content: format!("source text {i}"),
                    similarity: 0.9,
                })
                .collect(),
        }
    }

    async fn run(reply: &str, source_count: usize) -> String {
        let agent = StudyAgent::new(
            Arc::new(ScriptedClient {
                reply: reply.into(),
            }),
            vec![],
        );
        agent.start().await.unwrap();
        let mut stream = agent
            .process("question", &[], &hints(source_count))
            .await
            .unwrap();
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn valid_citations_pass_through() {
        let out = run("The answer is grounded [1] and also [2].", 2).await;
        assert!(out.contains("grounded [1]"));
    }

    #[tokio::test]
    async fn invalid_citations_become_a_refusal() {
        let out = run("A fabricated reference [9].", 2).await;
        assert_eq!(out, REFUSAL);
    }

    #[tokio::test]
    async fn study_agent_runs_at_temperature_zero() {
        let agent = StudyAgent::new(
            Arc::new(ScriptedClient {
                reply: String::new(),
            }),
            vec![],
        );
        assert_eq!(agent.profile().temperature, 0.0);
    }
}
