use serde::{Deserialize, Serialize};

/// Token usage as reported by the provider for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Outcome of a single provider call: the raw response body plus the
/// extracted text and the provider's own usage report.
#[derive(Debug, Clone)]
pub struct Completion {
    pub raw: serde_json::Value,
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

impl Completion {
    pub fn new(raw: serde_json::Value, text: String, usage: TokenUsage, model: String) -> Self {
        Self {
            raw,
            text,
            usage,
            model,
        }
    }
}
