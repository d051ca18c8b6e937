//! Deterministic token estimation.
//!
//! Single source of truth for token counting across the context engine and
//! the embedding client. The engine operates on text, so counts are estimated
//! from character length with model-family ratios; the estimate is within a
//! few percent for English text and always deterministic for a fixed model.

use serde::{Deserialize, Serialize};

/// Known tokenizer families, selected by model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerFamily {
    /// GPT-4 / GPT-4o / text-embedding-3 family.
    Cl100kBase,
    /// o-series models, slightly coarser vocabulary.
    O200kBase,
    /// SentencePiece-based models (Llama, Mistral).
    SentencePiece,
    /// Conservative fallback for unknown models.
    Heuristic,
}

/// Per-message overhead for role and separators.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

#[derive(Debug, Clone)]
pub struct Tokenizer {
    family: TokenizerFamily,
    chars_per_token: f32,
}

impl Tokenizer {
    pub fn new(family: TokenizerFamily) -> Self {
        let chars_per_token = match family {
            TokenizerFamily::Cl100kBase => 3.7,
            TokenizerFamily::O200kBase => 3.9,
            TokenizerFamily::SentencePiece => 3.3,
            TokenizerFamily::Heuristic => 3.5,
        };
        Self {
            family,
            chars_per_token,
        }
    }

    /// Select the tokenizer family for a model name.
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        let family = if lower.starts_with("o1") || lower.starts_with("o3") || lower.starts_with("o4")
        {
            TokenizerFamily::O200kBase
        } else if lower.starts_with("gpt-") || lower.starts_with("text-embedding-") {
            TokenizerFamily::Cl100kBase
        } else if lower.contains("llama") || lower.contains("mistral") {
            TokenizerFamily::SentencePiece
        } else {
            TokenizerFamily::Heuristic
        };
        Self::new(family)
    }

    pub fn family(&self) -> TokenizerFamily {
        self.family
    }

    /// Estimate the number of tokens in a string.
    ///
    /// Uses char count, not byte count; byte count would overcount CJK and
    /// emoji text. Non-empty text is always at least one token.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count();
        ((chars as f32 / self.chars_per_token).ceil() as usize).max(1)
    }

    /// Estimate tokens for one message including role overhead.
    pub fn count_message(&self, content: &str) -> usize {
        self.count(content) + MESSAGE_OVERHEAD_TOKENS
    }

    /// How many characters fit in a token budget.
    pub fn chars_for_tokens(&self, tokens: usize) -> usize {
        (tokens as f32 * self.chars_per_token) as usize
    }

    /// Truncate text to a token budget, respecting UTF-8 boundaries.
    ///
    /// Deterministic for a fixed family: the same input always yields the
    /// same prefix. Returns the truncated slice and its token cost.
    pub fn truncate_to_budget<'a>(&self, text: &'a str, max_tokens: usize) -> (&'a str, usize) {
        let current = self.count(text);
        if current <= max_tokens {
            return (text, current);
        }

        let mut end = self.chars_for_tokens(max_tokens).min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }

        // Prefer a whitespace break unless it discards over half the window.
        if let Some(last_space) = text[..end].rfind(|c: char| c.is_whitespace()) {
            if last_space > end / 2 {
                end = last_space;
            }
        }

        let truncated = &text[..end];
        (truncated, self.count(truncated))
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerFamily::Heuristic)
    }
}
