//! The context engine: per-session token budgeting, reduction, offloading.
//!
//! Each session's message log and token count sit behind a per-session lock,
//! which is held only for in-memory work. Anything that does I/O (LLM calls,
//! store writes) happens outside the lock on a snapshot, and state is
//! reconciled afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use murmur_common::{ChatRole, MurmurError, Result};

use crate::offload::{OffloadCache, OffloadKey, OffloadStats};
use crate::reducer::ContextReducer;
use crate::types::{ContextMessage, MessageContent, ReductionMode};

/// Fraction of the budget reductions aim for, leaving headroom for the next
/// message.
const REDUCTION_HEADROOM: f64 = 0.8;

struct SessionState {
    user_id: String,
    messages: Vec<ContextMessage>,
    token_count: usize,
    next_seq: u64,
    offloaded: Vec<OffloadKey>,
    created_at: DateTime<Utc>,
    last_activity: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub message_count: usize,
    pub token_count: usize,
    pub offloaded_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

pub struct ContextEngine {
    reducer: ContextReducer,
    offload: OffloadCache,
    max_tokens: usize,
    absolute_cap: usize,
    idle_ttl: Duration,
    sessions: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<SessionState>>>>,
}

impl ContextEngine {
    pub fn new(
        model: &str,
        max_tokens: usize,
        absolute_cap: usize,
        offload_capacity: usize,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            reducer: ContextReducer::new(model),
            offload: OffloadCache::new(offload_capacity, idle_ttl),
            max_tokens,
            absolute_cap,
            idle_ttl,
            sessions: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn session_arc(&self, session_id: &str, user_id: &str) -> Arc<AsyncMutex<SessionState>> {
        let mut sessions = self.sessions.lock();
        Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session = session_id, "Created context session");
            Arc::new(AsyncMutex::new(SessionState {
                user_id: user_id.to_string(),
                messages: Vec::new(),
                token_count: 0,
                next_seq: 0,
                offloaded: Vec::new(),
                created_at: Utc::now(),
                last_activity: Instant::now(),
            }))
        }))
    }

    fn existing_session(&self, session_id: &str) -> Option<Arc<AsyncMutex<SessionState>>> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Append a message, recount, and auto-reduce when over budget.
    ///
    /// If the session would exceed the absolute cap even after a full
    /// reduction, the message is rolled back and a `ContextError` surfaces;
    /// the session itself stays usable.
    pub async fn add_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: ChatRole,
        content: impl Into<MessageContent>,
        auto_reduce: bool,
    ) -> Result<usize> {
        let session = self.session_arc(session_id, user_id);
        let mut state = session.lock().await;
        state.last_activity = Instant::now();

        // A message no reduction could ever make fit is rejected up front,
        // leaving the session exactly as it was.
        let mut message = ContextMessage {
            role,
            content: content.into(),
            seq: 0,
        };
        let message_tokens = self.reducer.count_message(&message);
        if message_tokens > self.absolute_cap {
            return Err(MurmurError::context(
                session_id,
                format!(
                    "message of {message_tokens} tokens exceeds absolute cap {}",
                    self.absolute_cap
                ),
            ));
        }

        state.next_seq += 1;
        message.seq = state.next_seq;
        let new_seq = message.seq;
        state.messages.push(message);
        state.token_count = self.reducer.count(&state.messages);

        if auto_reduce && state.token_count > self.max_tokens {
            let target = (self.max_tokens as f64 * REDUCTION_HEADROOM) as usize;
            let before = state.messages.len();
            let drained = std::mem::take(&mut state.messages);
            let newest = drained
                .iter()
                .find(|m| m.seq == new_seq)
                .cloned()
                .expect("the message just added is present");
            state.messages = self.reducer.reduce(drained, ReductionMode::Summary, target);

            // Reduction never discards the message that triggered it.
            if !state.messages.iter().any(|m| m.seq == new_seq) {
                state.messages.push(newest);
            }
            state.token_count = self.reducer.count(&state.messages);
            info!(
                session = session_id,
                kept = state.messages.len(),
                dropped = before - state.messages.len(),
                tokens = state.token_count,
                "Reduced context"
            );
        }

        if state.token_count > self.absolute_cap {
            state.messages.retain(|m| m.seq != new_seq);
            state.token_count = self.reducer.count(&state.messages);
            return Err(MurmurError::context(
                session_id,
                format!(
                    "token count would exceed absolute cap {}",
                    self.absolute_cap
                ),
            ));
        }

        Ok(state.token_count)
    }

    /// Current context. With `include_offloaded`, cached messages are
    /// re-inserted into the live list in sequence order (each load records a
    /// cache hit).
    pub async fn get_context(
        &self,
        session_id: &str,
        include_offloaded: bool,
    ) -> Vec<ContextMessage> {
        let Some(session) = self.existing_session(session_id) else {
            return Vec::new();
        };

        if include_offloaded {
            // Snapshot keys under the session lock, load outside it.
            let keys: Vec<OffloadKey> = {
                let state = session.lock().await;
                state.offloaded.clone()
            };
            let restored: Vec<ContextMessage> =
                keys.iter().filter_map(|key| self.offload.load(key)).collect();
            for key in &keys {
                self.offload.remove(key);
            }

            let mut state = session.lock().await;
            state.offloaded.clear();
            state.messages.extend(restored);
            state.messages.sort_by_key(|m| m.seq);
            state.token_count = self.reducer.count(&state.messages);
            return state.messages.clone();
        }

        let messages = session.lock().await.messages.clone();
        messages
    }

    /// Move all but the newest `keep_recent` messages into the offload cache.
    pub async fn offload_old_messages(
        &self,
        session_id: &str,
        keep_recent: usize,
        priority: i64,
    ) -> usize {
        let Some(session) = self.existing_session(session_id) else {
            return 0;
        };

        let to_offload: Vec<ContextMessage> = {
            let mut state = session.lock().await;
            if state.messages.len() <= keep_recent {
                return 0;
            }
            let split = state.messages.len() - keep_recent;
            let old: Vec<ContextMessage> = state.messages.drain(..split).collect();
            state.token_count = self.reducer.count(&state.messages);
            old
        };

        let keys: Vec<OffloadKey> = to_offload
            .into_iter()
            .map(|message| {
                let key = OffloadKey {
                    session_id: session_id.to_string(),
                    seq: message.seq,
                };
                self.offload.offload(key.clone(), message, priority);
                key
            })
            .collect();

        let offloaded = keys.len();
        let mut state = session.lock().await;
        state.offloaded.extend(keys);
        info!(session = session_id, offloaded, "Offloaded old messages");
        offloaded
    }

    /// Cheap structural summary of the session.
    pub async fn summarize(&self, session_id: &str) -> String {
        let Some(session) = self.existing_session(session_id) else {
            return "Empty session".into();
        };
        let messages: Vec<ContextMessage> = {
            let state = session.lock().await;
            state.messages.clone()
        };
        if messages.is_empty() {
            return "Empty session".into();
        }

        let user_count = messages.iter().filter(|m| m.role == ChatRole::User).count();
        let assistant_count = messages
            .iter()
            .filter(|m| m.role == ChatRole::Assistant)
            .count();
        let first_user = messages
            .iter()
            .find(|m| m.role == ChatRole::User)
            .map(|m| excerpt(&m.content.as_text(), 100));
        let last_assistant = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
            .map(|m| excerpt(&m.content.as_text(), 100));

        format!(
            "Session with {user_count} user messages, {assistant_count} assistant responses | \
             Started: {} | Latest response: {}",
            first_user.unwrap_or_else(|| "n/a".into()),
            last_assistant.unwrap_or_else(|| "n/a".into()),
        )
    }

    pub async fn session_stats(&self, session_id: &str) -> SessionStats {
        let Some(session) = self.existing_session(session_id) else {
            return SessionStats {
                session_id: session_id.to_string(),
                exists: false,
                user_id: None,
                message_count: 0,
                token_count: 0,
                offloaded_count: 0,
                created_at: None,
            };
        };
        let state = session.lock().await;
        SessionStats {
            session_id: session_id.to_string(),
            exists: true,
            user_id: Some(state.user_id.clone()),
            message_count: state.messages.len(),
            token_count: state.token_count,
            offloaded_count: state.offloaded.len(),
            created_at: Some(state.created_at),
        }
    }

    pub fn offload_stats(&self) -> OffloadStats {
        self.offload.stats()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drop sessions idle past the TTL. Returns how many were removed.
    pub async fn sweep_idle(&self) -> usize {
        let candidates: Vec<(String, Arc<AsyncMutex<SessionState>>)> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .map(|(id, arc)| (id.clone(), Arc::clone(arc)))
                .collect()
        };

        let mut expired = Vec::new();
        for (id, session) in candidates {
            let state = session.lock().await;
            if state.last_activity.elapsed() > self.idle_ttl {
                for key in &state.offloaded {
                    self.offload.remove(key);
                }
                expired.push(id);
            }
        }

        let mut sessions = self.sessions.lock();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Swept idle sessions");
        }
        expired.len()
    }

    /// TTL sweep of the offload cache; driven by a registered background task.
    pub fn sweep_offload_cache(&self) -> usize {
        self.offload.sweep_expired()
    }

    pub async fn close_session(&self, session_id: &str) {
        let removed = self.sessions.lock().remove(session_id);
        if let Some(session) = removed {
            let state = session.lock().await;
            for key in &state.offloaded {
                self.offload.remove(key);
            }
            debug!(session = session_id, "Closed context session");
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
