//! Parallel agent lifecycle management.
//!
//! Agents start and stop concurrently; a failure in one never masks the
//! others, and the aggregated error names every agent that failed.

use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use murmur_common::{Agent, MurmurError, Result};

async fn run_all<F>(agents: &[Arc<dyn Agent>], verb: &str, op: F) -> Result<()>
where
    F: Fn(Arc<dyn Agent>) -> futures::future::BoxFuture<'static, Result<()>>,
{
    let outcomes = join_all(agents.iter().map(|agent| {
        let agent = Arc::clone(agent);
        let id = agent.id().to_string();
        let future = op(agent);
        async move { (id, future.await) }
    }))
    .await;

    let failures: Vec<String> = outcomes
        .into_iter()
        .filter_map(|(id, result)| result.err().map(|err| format!("{id}: {err}")))
        .collect();

    if failures.is_empty() {
        info!(count = agents.len(), action = verb, "Agent lifecycle pass finished");
        Ok(())
    } else {
        Err(MurmurError::llm_permanent(format!(
            "{} agent(s) failed to {verb}: {}",
            failures.len(),
            failures.join("; ")
        )))
    }
}

/// Start every agent in parallel.
pub async fn start_all(agents: &[Arc<dyn Agent>]) -> Result<()> {
    run_all(agents, "start", |agent| {
        Box::pin(async move { agent.start().await })
    })
    .await
}

/// Stop every agent in parallel.
pub async fn stop_all(agents: &[Arc<dyn Agent>]) -> Result<()> {
    run_all(agents, "stop", |agent| {
        Box::pin(async move { agent.stop().await })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_common::{AgentKind, AgentProfile, ChatTurn, ChunkStream, MemoryHints};

    struct FlakyAgent {
        profile: AgentProfile,
        fail_start: bool,
    }

    #[async_trait]
    impl Agent for FlakyAgent {
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
            unreachable!("lifecycle tests never process")
        }
        async fn start(&self) -> Result<()> {
            if self.fail_start {
                Err(MurmurError::llm_permanent("boot failure"))
            } else {
                Ok(())
            }
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn agent(id: &str, fail_start: bool) -> Arc<dyn Agent> {
        Arc::new(FlakyAgent {
            profile: AgentProfile::new(id, id, 0.5),
            fail_start,
        })
    }

    #[tokio::test]
    async fn all_healthy_agents_start() {
        let agents = vec![agent("a", false), agent("b", false)];
        assert!(start_all(&agents).await.is_ok());
        assert!(stop_all(&agents).await.is_ok());
    }

    #[tokio::test]
    async fn aggregated_error_names_every_failure() {
        let agents = vec![agent("good", false), agent("bad-1", true), agent("bad-2", true)];
        let err = start_all(&agents).await.unwrap_err().to_string();
        assert!(err.contains("bad-1"));
        assert!(err.contains("bad-2"));
        assert!(!err.contains("good:"));
    }
}
