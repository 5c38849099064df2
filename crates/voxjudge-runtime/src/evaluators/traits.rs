//! Adapter traits and their error type.

use async_trait::async_trait;
use thiserror::Error;
use voxjudge_core::{
    EvaluationFailure, EvaluationRequest, EvaluationResult, FailureKind, InvalidInputError,
    VerdictParseError,
};

use crate::providers::ProviderError;

/// Errors from evaluator and curator adapters.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    #[error("{provider} unavailable after {attempts} attempt(s): {source}")]
    ProviderUnavailable {
        provider: String,
        attempts: usize,
        #[source]
        source: ProviderError,
    },

    #[error("{provider} returned an unusable verdict: {source}")]
    ResponseParse {
        provider: String,
        #[source]
        source: VerdictParseError,
    },
}

impl AdapterError {
    /// The failure recorded on the UNCERTAIN result that replaces this error.
    pub fn to_failure(&self) -> EvaluationFailure {
        let kind = match self {
            AdapterError::ResponseParse { .. } => FailureKind::ResponseParse,
            // Requests are validated before dispatch, so an adapter that still
            // rejects one simply produced no verdict.
            AdapterError::InvalidInput(_) | AdapterError::ProviderUnavailable { .. } => {
                FailureKind::ProviderUnavailable
            }
        };
        EvaluationFailure::new(kind, self.to_string())
    }
}

/// One independent judgment of a turn.
///
/// Implementations must not share mutable state with the other evaluator;
/// the orchestrator runs both concurrently.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, AdapterError>;
}

/// Tie-breaker consulted when the evaluators do not agree.
#[async_trait]
pub trait Curator: Send + Sync {
    async fn curate(
        &self,
        request: &EvaluationRequest,
        result_a: &EvaluationResult,
        result_b: &EvaluationResult,
    ) -> Result<EvaluationResult, AdapterError>;
}
