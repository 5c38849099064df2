//! Token usage and cost accounting for LLM calls.

use serde::{Deserialize, Serialize};

use crate::types::{EvaluationResult, FailureKind};

/// Token usage from a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Tokens read from cache (Anthropic)
    #[serde(default)]
    pub cache_read_tokens: u32,

    /// Tokens written to cache (Anthropic)
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used. Saturates at `u32::MAX`.
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    /// Sum two usages (e.g. across retry attempts).
    pub fn merge(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
            cache_read_tokens: self.cache_read_tokens.saturating_add(other.cache_read_tokens),
            cache_creation_tokens: self
                .cache_creation_tokens
                .saturating_add(other.cache_creation_tokens),
        }
    }
}

/// Accumulated LLM usage for one consensus decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u32,

    /// Prompt/input tokens
    pub prompt_tokens: u32,

    /// Completion/output tokens
    pub completion_tokens: u32,

    /// Number of provider calls made
    pub llm_calls: u32,

    /// Results served from the verdict cache
    pub cache_hits: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    /// Tokens written to provider prompt cache
    pub cache_creation_tokens: u32,

    /// Tokens read from provider prompt cache
    pub cache_read_tokens: u32,
}

impl LlmUsage {
    /// Aggregate usage across the results of one decision.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a EvaluationResult>) -> Self {
        let mut usage = Self::default();
        for result in results {
            usage.record(result);
        }
        usage
    }

    /// Add one evaluation result.
    ///
    /// Cache hits and skipped calls (open circuit) do not count as calls.
    pub fn record(&mut self, result: &EvaluationResult) {
        if result.cached {
            self.cache_hits = self.cache_hits.saturating_add(1);
            return;
        }
        if matches!(
            result.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::CircuitOpen)
        ) {
            return;
        }

        self.llm_calls = self.llm_calls.saturating_add(1);
        self.add(&result.usage, result.model.as_deref().unwrap_or_default());
    }

    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(usage.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total());
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(usage.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(usage.cache_read_tokens);
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Estimate cost for a usage entry.
    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens: input, output, cache write, cache read
        let (input_rate, output_rate, cache_write_rate, cache_read_rate) = match model {
            m if m.contains("sonnet") => (3.0, 15.0, 3.75, 0.3),
            m if m.contains("opus") => (5.0, 25.0, 6.25, 0.5),
            m if m.contains("haiku") => (1.0, 5.0, 1.25, 0.1),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6, 0.0, 0.0),
            m if m.contains("gpt-4o") => (2.5, 10.0, 0.0, 0.0),
            m if m.contains("gpt-4.1-mini") => (0.4, 1.6, 0.0, 0.0),
            m if m.contains("gpt-4.1") => (2.0, 8.0, 0.0, 0.0),
            _ => (3.0, 15.0, 3.75, 0.3),
        };

        let per_million = |tokens: u32, rate: f64| (tokens as f64 / 1_000_000.0) * rate;

        per_million(usage.prompt_tokens, input_rate)
            + per_million(usage.completion_tokens, output_rate)
            + per_million(usage.cache_creation_tokens, cache_write_rate)
            + per_million(usage.cache_read_tokens, cache_read_rate)
    }
}
