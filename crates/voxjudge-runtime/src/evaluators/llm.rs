//! LLM-backed evaluator.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use voxjudge_core::{parse_verdict, EvaluationRequest, EvaluationResult};

use super::traits::{AdapterError, Evaluator};
use crate::config::SlotConfig;
use crate::prompts::{self, PromptTemplate};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};
use crate::resilience::{RetryOutcome, RetryPolicy};

/// Evaluator that asks one provider for a verdict.
pub struct LlmEvaluator {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    template: PromptTemplate,
    retry: RetryPolicy,
}

impl LlmEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
            template: PromptTemplate::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Evaluator configured from a pipeline slot.
    pub fn from_slot(provider: Arc<dyn LlmProvider>, settings: &SlotConfig) -> Self {
        Self {
            provider,
            completion: settings.completion_config(),
            template: settings.template,
            retry: settings.retry_policy(),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn template(&self) -> PromptTemplate {
        self.template
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, AdapterError> {
        request.validate()?;
        let messages = prompts::evaluator_messages(self.template, request);
        request_verdict(self.provider.as_ref(), &self.completion, &self.retry, messages).await
    }
}

/// Call the provider with retries and parse its verdict.
pub(crate) async fn request_verdict(
    provider: &dyn LlmProvider,
    completion: &CompletionConfig,
    retry: &RetryPolicy,
    messages: Vec<ChatMessage>,
) -> Result<EvaluationResult, AdapterError> {
    let started = Instant::now();

    let RetryOutcome { result, attempts } = retry
        .run(provider.name(), || provider.complete(messages.clone(), completion))
        .await;

    let response = result.map_err(|source| AdapterError::ProviderUnavailable {
        provider: provider.name().to_string(),
        attempts,
        source,
    })?;

    let parsed = parse_verdict(&response.content).map_err(|source| AdapterError::ResponseParse {
        provider: provider.name().to_string(),
        source,
    })?;

    tracing::debug!(
        provider = provider.name(),
        model = %response.model,
        verdict = %parsed.verdict,
        confidence = parsed.confidence,
        attempts,
        "Verdict received"
    );

    Ok(parsed.into_result(
        provider.name(),
        response.model,
        started.elapsed(),
        response.usage,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderError, ScriptedProvider};
    use std::time::Duration;
    use voxjudge_core::Verdict;

    fn request() -> EvaluationRequest {
        EvaluationRequest::new("book a 2pm flight", "booked a 2pm flight to Boston").unwrap()
    }

    fn fast_retry(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries).with_delays(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_parses_provider_verdict() {
        let provider = Arc::new(ScriptedProvider::new("scripted").respond(
            "```json\n{\"verdict\":\"PASS\",\"confidence\":0.91,\"rationale\":\"2pm flight booked\"}\n```",
        ));
        let evaluator = LlmEvaluator::new(provider.clone(), CompletionConfig::default());

        let result = evaluator.evaluate(&request()).await.unwrap();
        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.confidence, 0.91);
        assert_eq!(result.provider, "scripted");
        assert_eq!(result.model.as_deref(), Some("claude-sonnet-4-5"));
        assert!(result.usage.prompt_tokens > 0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_template_reaches_the_prompt() {
        let provider = Arc::new(ScriptedProvider::new("scripted").respond(
            r#"{"verdict":"FAIL","confidence":0.7,"rationale":"caller left without a booking"}"#,
        ));
        let evaluator = LlmEvaluator::new(provider.clone(), CompletionConfig::default())
            .with_template(PromptTemplate::GoalOriented);

        evaluator.evaluate(&request()).await.unwrap();
        assert!(provider.last_messages()[0].content.contains("Caller Goal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_unavailable() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .fail(ProviderError::HttpError("reset".into()))
                .fail(ProviderError::Timeout(Duration::from_secs(15)))
                .fail(ProviderError::ApiError {
                    status: 502,
                    message: "bad gateway".into(),
                }),
        );
        let evaluator =
            LlmEvaluator::new(provider.clone(), CompletionConfig::default()).with_retry(fast_retry(2));

        let err = evaluator.evaluate(&request()).await.unwrap_err();
        assert!(matches!(err, AdapterError::ProviderUnavailable { attempts: 3, .. }));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .fail(ProviderError::AuthError)
                .respond(r#"{"verdict":"PASS","confidence":0.9,"rationale":"ok"}"#),
        );
        let evaluator =
            LlmEvaluator::new(provider.clone(), CompletionConfig::default()).with_retry(fast_retry(2));

        let err = evaluator.evaluate(&request()).await.unwrap_err();
        assert!(matches!(err, AdapterError::ProviderUnavailable { attempts: 1, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_is_parse_error() {
        let provider = Arc::new(ScriptedProvider::new("scripted").respond("The agent did fine."));
        let evaluator = LlmEvaluator::new(provider.clone(), CompletionConfig::default());

        let err = evaluator.evaluate(&request()).await.unwrap_err();
        assert!(matches!(err, AdapterError::ResponseParse { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_from_slot_takes_template_and_retries() {
        let mut settings = SlotConfig::new("scripted", "dry-run");
        settings.template = PromptTemplate::GoalOriented;
        settings.max_retries = 0;
        let provider = Arc::new(ScriptedProvider::new("scripted"));

        let evaluator = LlmEvaluator::from_slot(provider, &settings);
        assert_eq!(evaluator.template(), PromptTemplate::GoalOriented);
        assert_eq!(evaluator.retry.max_retries(), 0);
        assert_eq!(evaluator.completion.model, "dry-run");
    }
}
