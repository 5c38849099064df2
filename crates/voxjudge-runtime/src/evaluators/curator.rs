//! LLM-backed curator.

use async_trait::async_trait;
use std::sync::Arc;
use voxjudge_core::{EvaluationRequest, EvaluationResult};

use super::llm::request_verdict;
use super::traits::{AdapterError, Curator};
use crate::config::SlotConfig;
use crate::prompts;
use crate::providers::{CompletionConfig, LlmProvider};
use crate::resilience::RetryPolicy;

/// Curator that shows a provider both evaluations and asks for its own verdict.
pub struct LlmCurator {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryPolicy,
}

impl LlmCurator {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_slot(provider: Arc<dyn LlmProvider>, settings: &SlotConfig) -> Self {
        Self {
            provider,
            completion: settings.completion_config(),
            retry: settings.retry_policy(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Curator for LlmCurator {
    async fn curate(
        &self,
        request: &EvaluationRequest,
        result_a: &EvaluationResult,
        result_b: &EvaluationResult,
    ) -> Result<EvaluationResult, AdapterError> {
        request.validate()?;
        let messages = prompts::curator_messages(request, result_a, result_b);
        request_verdict(self.provider.as_ref(), &self.completion, &self.retry, messages).await
    }
}
