//! Token accounting and context reduction.

use murmur_common::{ChatRole, Tokenizer};

use crate::types::{ContentPart, ContextMessage, MessageContent, ReductionMode};

/// Counts tokens deterministically and trims message lists to budget.
#[derive(Debug, Clone)]
pub struct ContextReducer {
    tokenizer: Tokenizer,
}

impl ContextReducer {
    pub fn new(model: &str) -> Self {
        Self {
            tokenizer: Tokenizer::for_model(model),
        }
    }

    /// Tokens in one message. Multimodal content counts each text part;
    /// non-text parts cost nothing here.
    pub fn count_message(&self, message: &ContextMessage) -> usize {
        match &message.content {
            MessageContent::Text(text) => self.tokenizer.count(text),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .map(|text| self.tokenizer.count(text))
                .sum(),
        }
    }

    pub fn count(&self, messages: &[ContextMessage]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    pub fn reduce(
        &self,
        messages: Vec<ContextMessage>,
        mode: ReductionMode,
        max_tokens: usize,
    ) -> Vec<ContextMessage> {
        match mode {
            ReductionMode::Full => self.reduce_full(messages, max_tokens),
            ReductionMode::Compact => self.reduce_compact(messages, max_tokens),
            ReductionMode::Summary => self.reduce_summary(messages, max_tokens),
        }
    }

    /// Keep the newest messages up to budget: walk backwards appending into a
    /// reversed buffer, then reverse once.
    fn reduce_full(&self, messages: Vec<ContextMessage>, max_tokens: usize) -> Vec<ContextMessage> {
        let mut reversed = Vec::new();
        let mut used = 0;
        for message in messages.into_iter().rev() {
            let tokens = self.count_message(&message);
            if used + tokens > max_tokens {
                break;
            }
            used += tokens;
            reversed.push(message);
        }
        reversed.reverse();
        reversed
    }

    /// Collapse whitespace in every text part, then keep messages in order
    /// while they fit.
    fn reduce_compact(
        &self,
        messages: Vec<ContextMessage>,
        max_tokens: usize,
    ) -> Vec<ContextMessage> {
        let mut kept = Vec::new();
        let mut used = 0;
        for message in messages {
            let compacted = compact_message(message);
            let tokens = self.count_message(&compacted);
            if used + tokens > max_tokens {
                break;
            }
            used += tokens;
            kept.push(compacted);
        }
        kept
    }

    /// Preserve system messages (newest first when they alone exceed budget),
    /// then fill the remainder with the newest conversational messages.
    fn reduce_summary(
        &self,
        messages: Vec<ContextMessage>,
        max_tokens: usize,
    ) -> Vec<ContextMessage> {
        let (system, conversation): (Vec<_>, Vec<_>) = messages
            .into_iter()
            .partition(|m| m.role == ChatRole::System);

        let mut kept_system = Vec::new();
        let mut used = 0;
        for message in system.into_iter().rev() {
            let tokens = self.count_message(&message);
            if used + tokens > max_tokens {
                break;
            }
            used += tokens;
            kept_system.push(message);
        }
        kept_system.reverse();

        let mut kept_conversation = Vec::new();
        for message in conversation.into_iter().rev() {
            let tokens = self.count_message(&message);
            if used + tokens > max_tokens {
                break;
            }
            used += tokens;
            kept_conversation.push(message);
        }
        kept_conversation.reverse();

        let mut result = kept_system;
        result.extend(kept_conversation);
        result
    }
}

fn compact_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn compact_message(message: ContextMessage) -> ContextMessage {
    let content = match message.content {
        MessageContent::Text(text) => MessageContent::Text(compact_text(&text)),
        MessageContent::Parts(parts) => MessageContent::Parts(
            parts
                .into_iter()
                .map(|part| ContentPart {
                    text: part.text.as_deref().map(compact_text),
                    ..part
                })
                .collect(),
        ),
    };
    ContextMessage { content, ..message }
}
