//! Pipeline orchestrator: two evaluators, one curator, one decision.
//!
//! The orchestrator implements:
//! - Concurrent fan-out to both evaluators via `tokio::join!`
//! - A shared deadline for the evaluator phase
//! - Deterministic fan-in through the core `Synthesizer`
//! - The curator call, only when the evaluators are not unanimous
//!
//! Adapter failures and timeouts never reach the caller. They become
//! UNCERTAIN results recorded in the decision.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use voxjudge_core::{
    ConsensusDecision, EvaluationFailure, EvaluationRequest, EvaluationResult, FailureKind,
    InvalidInputError, Synthesis, Synthesizer,
};

use crate::cache::{CacheConfig, CacheKey, VerdictCache};
use crate::config::{ConfigError, PipelineConfig, SlotConfig};
use crate::evaluators::{Curator, Evaluator, LlmCurator, LlmEvaluator};
use crate::providers::{ProviderError, ProviderRegistry};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::{SLOT_CURATOR, SLOT_EVALUATOR_A, SLOT_EVALUATOR_B};

const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from assembling a pipeline.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No adapter configured for slot '{0}'")]
    MissingSlot(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot create provider for slot '{slot}': {source}")]
    Provider {
        slot: &'static str,
        #[source]
        source: ProviderError,
    },
}

/// An adapter bound to a pipeline slot.
struct Slot<T: ?Sized> {
    /// Slot name used for cache and circuit keys
    key: &'static str,

    /// Provider label written on degraded results
    label: String,

    adapter: Arc<T>,
}

/// Runs the evaluator/curator pipeline for one turn at a time.
///
/// Holds no per-call mutable state. The optional circuit breaker and cache
/// are the only state shared across calls.
pub struct PipelineOrchestrator {
    evaluator_a: Slot<dyn Evaluator>,
    evaluator_b: Slot<dyn Evaluator>,
    curator: Slot<dyn Curator>,
    evaluation_timeout: Duration,
    curator_timeout: Duration,
    circuit_breaker: Option<CircuitBreaker>,
    cache: Option<VerdictCache>,
    synthesizer: Synthesizer,
}

impl PipelineOrchestrator {
    pub fn builder() -> PipelineOrchestratorBuilder {
        PipelineOrchestratorBuilder::new()
    }

    /// Build providers and adapters for every slot in `config`.
    pub fn from_config(
        config: &PipelineConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let provider_a = create_provider(registry, SLOT_EVALUATOR_A, &config.evaluator_a)?;
        let provider_b = create_provider(registry, SLOT_EVALUATOR_B, &config.evaluator_b)?;
        let provider_curator = create_provider(registry, SLOT_CURATOR, &config.curator)?;

        // Degraded results carry the same provider name as answered ones
        let mut builder = Self::builder()
            .evaluator_a(
                provider_a.name().to_string(),
                Arc::new(LlmEvaluator::from_slot(provider_a, &config.evaluator_a)),
            )
            .evaluator_b(
                provider_b.name().to_string(),
                Arc::new(LlmEvaluator::from_slot(provider_b, &config.evaluator_b)),
            )
            .curator(
                provider_curator.name().to_string(),
                Arc::new(LlmCurator::from_slot(provider_curator, &config.curator)),
            )
            .evaluation_timeout(config.evaluation_timeout)
            .curator_timeout(config.curator_timeout);

        if let Some(breaker) = &config.circuit_breaker {
            builder = builder.circuit_breaker(breaker.clone());
        }
        if let Some(cache) = &config.cache {
            builder = builder.cache(cache.clone());
        }

        builder.build()
    }

    /// Validate one turn.
    ///
    /// Only an invalid request is returned as an error. Every other failure
    /// ends up in the decision as an UNCERTAIN result.
    pub async fn run(&self, request: &EvaluationRequest) -> Result<ConsensusDecision, InvalidInputError> {
        request.validate()?;

        let started = Instant::now();
        let deadline = started + self.evaluation_timeout;

        let (result_a, result_b) = tokio::join!(
            self.evaluate_slot(&self.evaluator_a, request, deadline),
            self.evaluate_slot(&self.evaluator_b, request, deadline),
        );

        let decision = match self.synthesizer.synthesize(result_a, result_b) {
            Synthesis::Decided(decision) => decision,
            Synthesis::NeedsCurator(disputed) => {
                let curated = self
                    .curate(request, disputed.evaluator_a(), disputed.evaluator_b())
                    .await;
                self.synthesizer.resolve(disputed, curated)
            }
        };

        tracing::info!(
            final_verdict = %decision.final_verdict(),
            reason = decision.reason().code(),
            evaluator_a = %decision.evaluator_a().verdict,
            evaluator_b = %decision.evaluator_b().verdict,
            curator = ?decision.curator().map(|c| c.verdict),
            llm_calls = decision.usage().llm_calls,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Consensus decision"
        );

        Ok(decision)
    }

    /// Validate many turns with at most `concurrency` pipelines in flight.
    ///
    /// Results are returned in input order.
    pub async fn run_batch(
        &self,
        requests: &[EvaluationRequest],
        concurrency: usize,
    ) -> Vec<Result<ConsensusDecision, InvalidInputError>> {
        stream::iter(requests.iter().map(|request| self.run(request)))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn evaluate_slot(
        &self,
        slot: &Slot<dyn Evaluator>,
        request: &EvaluationRequest,
        deadline: Instant,
    ) -> EvaluationResult {
        let cache_key = self.cache.as_ref().map(|_| CacheKey::new(slot.key, request));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key).await {
                tracing::debug!(slot = slot.key, verdict = %hit.verdict, "Verdict cache hit");
                return hit;
            }
        }

        if let Some(result) = self.skip_if_open(slot.key, &slot.label) {
            return result;
        }

        let result = match tokio::time::timeout_at(deadline, slot.adapter.evaluate(request)).await {
            Ok(Ok(result)) => {
                self.record(slot.key, true);
                result
            }
            Ok(Err(e)) => {
                tracing::warn!(slot = slot.key, error = %e, "Evaluator failed, treating as UNCERTAIN");
                self.record(slot.key, false);
                EvaluationResult::degraded(&slot.label, e.to_failure())
            }
            Err(_) => {
                tracing::warn!(
                    slot = slot.key,
                    timeout = ?self.evaluation_timeout,
                    "Evaluator timed out, treating as UNCERTAIN"
                );
                self.record(slot.key, false);
                EvaluationResult::degraded(
                    &slot.label,
                    EvaluationFailure::new(
                        FailureKind::Timeout,
                        format!("no verdict within {:?}", self.evaluation_timeout),
                    ),
                )
            }
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, &result).await;
        }

        result
    }

    async fn curate(
        &self,
        request: &EvaluationRequest,
        result_a: &EvaluationResult,
        result_b: &EvaluationResult,
    ) -> EvaluationResult {
        let slot = &self.curator;

        if let Some(result) = self.skip_if_open(slot.key, &slot.label) {
            return result;
        }

        match tokio::time::timeout(
            self.curator_timeout,
            slot.adapter.curate(request, result_a, result_b),
        )
        .await
        {
            Ok(Ok(result)) => {
                self.record(slot.key, true);
                result
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Curator failed, deferring to human review");
                self.record(slot.key, false);
                EvaluationResult::degraded(&slot.label, e.to_failure())
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.curator_timeout, "Curator timed out, deferring to human review");
                self.record(slot.key, false);
                EvaluationResult::degraded(
                    &slot.label,
                    EvaluationFailure::new(
                        FailureKind::Timeout,
                        format!("no curator verdict within {:?}", self.curator_timeout),
                    ),
                )
            }
        }
    }

    fn skip_if_open(&self, key: &'static str, label: &str) -> Option<EvaluationResult> {
        let breaker = self.circuit_breaker.as_ref()?;
        if !breaker.is_open(key) {
            return None;
        }
        tracing::warn!(slot = key, "Circuit open, skipping call");
        Some(EvaluationResult::degraded(
            label,
            EvaluationFailure::new(FailureKind::CircuitOpen, format!("circuit open for {}", key)),
        ))
    }

    fn record(&self, key: &'static str, success: bool) {
        if let Some(breaker) = &self.circuit_breaker {
            if success {
                breaker.record_success(key);
            } else {
                breaker.record_failure(key);
            }
        }
    }

    /// Circuit breaker, if enabled.
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.circuit_breaker.as_ref()
    }

    /// Verdict cache, if enabled.
    pub fn cache(&self) -> Option<&VerdictCache> {
        self.cache.as_ref()
    }
}

fn create_provider(
    registry: &ProviderRegistry,
    slot: &'static str,
    settings: &SlotConfig,
) -> Result<Arc<dyn crate::providers::LlmProvider>, RuntimeError> {
    registry
        .create(settings)
        .map_err(|source| RuntimeError::Provider { slot, source })
}

/// Builder for [`PipelineOrchestrator`].
pub struct PipelineOrchestratorBuilder {
    evaluator_a: Option<Slot<dyn Evaluator>>,
    evaluator_b: Option<Slot<dyn Evaluator>>,
    curator: Option<Slot<dyn Curator>>,
    evaluation_timeout: Duration,
    curator_timeout: Duration,
    circuit_breaker: Option<CircuitBreakerConfig>,
    cache: Option<CacheConfig>,
}

impl PipelineOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            evaluator_a: None,
            evaluator_b: None,
            curator: None,
            evaluation_timeout: DEFAULT_PHASE_TIMEOUT,
            curator_timeout: DEFAULT_PHASE_TIMEOUT,
            circuit_breaker: None,
            cache: None,
        }
    }

    /// Set evaluator A; `label` names it on degraded results.
    pub fn evaluator_a(mut self, label: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator_a = Some(Slot {
            key: SLOT_EVALUATOR_A,
            label: label.into(),
            adapter: evaluator,
        });
        self
    }

    /// Set evaluator B; `label` names it on degraded results.
    pub fn evaluator_b(mut self, label: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator_b = Some(Slot {
            key: SLOT_EVALUATOR_B,
            label: label.into(),
            adapter: evaluator,
        });
        self
    }

    pub fn curator(mut self, label: impl Into<String>, curator: Arc<dyn Curator>) -> Self {
        self.curator = Some(Slot {
            key: SLOT_CURATOR,
            label: label.into(),
            adapter: curator,
        });
        self
    }

    pub fn evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    pub fn curator_timeout(mut self, timeout: Duration) -> Self {
        self.curator_timeout = timeout;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn build(self) -> Result<PipelineOrchestrator, RuntimeError> {
        Ok(PipelineOrchestrator {
            evaluator_a: self.evaluator_a.ok_or(RuntimeError::MissingSlot(SLOT_EVALUATOR_A))?,
            evaluator_b: self.evaluator_b.ok_or(RuntimeError::MissingSlot(SLOT_EVALUATOR_B))?,
            curator: self.curator.ok_or(RuntimeError::MissingSlot(SLOT_CURATOR))?,
            evaluation_timeout: self.evaluation_timeout,
            curator_timeout: self.curator_timeout,
            circuit_breaker: self.circuit_breaker.map(CircuitBreaker::new),
            cache: self.cache.as_ref().map(VerdictCache::new),
            synthesizer: Synthesizer::new(),
        })
    }
}

impl Default for PipelineOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
