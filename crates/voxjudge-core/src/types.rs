//! Verdicts, evaluation results, and the consensus decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::usage::{LlmUsage, TokenUsage};

/// Verdict produced by a single evaluator or curator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// The agent response satisfies the expected behavior
    Pass,

    /// The agent response does not satisfy the expected behavior
    Fail,

    /// The evaluator could not decide (or could not be reached)
    Uncertain,
}

impl Verdict {
    /// PASS and FAIL are definitive; UNCERTAIN is not.
    pub fn is_definitive(self) -> bool {
        !matches!(self, Verdict::Uncertain)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Uncertain => "UNCERTAIN",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the closed verdict values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown verdict '{0}'")]
pub struct UnknownVerdict(pub String);

impl FromStr for Verdict {
    type Err = UnknownVerdict;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(Verdict::Pass),
            "FAIL" => Ok(Verdict::Fail),
            "UNCERTAIN" => Ok(Verdict::Uncertain),
            _ => Err(UnknownVerdict(s.to_string())),
        }
    }
}

/// Final verdict of a pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalVerdict {
    Pass,
    Fail,
    HumanReview,
}

impl fmt::Display for FinalVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalVerdict::Pass => f.write_str("PASS"),
            FinalVerdict::Fail => f.write_str("FAIL"),
            FinalVerdict::HumanReview => f.write_str("HUMAN_REVIEW"),
        }
    }
}

/// Why the pipeline reached its final verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    UnanimousPass,
    UnanimousFail,
    CuratorBrokeTiePass,
    CuratorBrokeTieFail,
    CuratorInconclusive,
}

impl DecisionReason {
    /// Reason code as persisted by callers.
    pub fn code(self) -> &'static str {
        match self {
            DecisionReason::UnanimousPass => "unanimous_pass",
            DecisionReason::UnanimousFail => "unanimous_fail",
            DecisionReason::CuratorBrokeTiePass => "curator_broke_tie_pass",
            DecisionReason::CuratorBrokeTieFail => "curator_broke_tie_fail",
            DecisionReason::CuratorInconclusive => "curator_inconclusive",
        }
    }

    /// Whether this reason implies a curator result is present.
    pub fn involves_curator(self) -> bool {
        !matches!(
            self,
            DecisionReason::UnanimousPass | DecisionReason::UnanimousFail
        )
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Category of a degraded evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Provider unreachable or erroring after all retries
    ProviderUnavailable,

    /// Provider answered but the output could not be interpreted
    ResponseParse,

    /// The call did not finish before the pipeline deadline
    Timeout,

    /// The slot's circuit breaker was open, no call was made
    CircuitOpen,
}

/// Why an evaluation degraded to UNCERTAIN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl EvaluationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Output of a single evaluator or curator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub verdict: Verdict,

    /// Confidence in the verdict (0.0 - 1.0)
    pub confidence: f64,

    pub rationale: String,

    /// Provider or slot that produced this result
    pub provider: String,

    /// Model reported by the provider, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(rename = "latency_ms", with = "duration_millis")]
    pub latency: Duration,

    #[serde(default)]
    pub usage: TokenUsage,

    /// Served from the verdict cache rather than a provider call
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,

    /// Present when the result is a degraded UNCERTAIN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<EvaluationFailure>,
}

impl EvaluationResult {
    /// Create a result; confidence is clamped into `0.0..=1.0` (NaN becomes 0.0).
    pub fn new(
        verdict: Verdict,
        confidence: f64,
        rationale: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            verdict,
            confidence: clamp_confidence(confidence),
            rationale: rationale.into(),
            provider: provider.into(),
            model: None,
            latency: Duration::ZERO,
            usage: TokenUsage::default(),
            cached: false,
            failure: None,
        }
    }

    /// An UNCERTAIN result standing in for a failed call.
    pub fn degraded(provider: impl Into<String>, failure: EvaluationFailure) -> Self {
        Self {
            verdict: Verdict::Uncertain,
            confidence: 0.0,
            rationale: failure.message.clone(),
            provider: provider.into(),
            model: None,
            latency: Duration::ZERO,
            usage: TokenUsage::default(),
            cached: false,
            failure: Some(failure),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Mark this result as a cache hit (no tokens spent on this call).
    pub fn into_cached(mut self) -> Self {
        self.cached = true;
        self.usage = TokenUsage::default();
        self.latency = Duration::ZERO;
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }

    /// A PASS or FAIL that came from a successful call.
    pub fn is_definitive(&self) -> bool {
        self.failure.is_none() && self.verdict.is_definitive()
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Final, audit-preserving pipeline output.
///
/// Built only through [`Synthesizer`](crate::Synthesizer), which guarantees
/// that `curator` is present exactly when the evaluators did not agree on a
/// definitive verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusDecision {
    final_verdict: FinalVerdict,
    reason: DecisionReason,
    evaluator_a: EvaluationResult,
    evaluator_b: EvaluationResult,
    curator: Option<EvaluationResult>,
    usage: LlmUsage,
    decided_at: DateTime<Utc>,
}

impl ConsensusDecision {
    pub(crate) fn new(
        final_verdict: FinalVerdict,
        reason: DecisionReason,
        evaluator_a: EvaluationResult,
        evaluator_b: EvaluationResult,
        curator: Option<EvaluationResult>,
    ) -> Self {
        let usage = LlmUsage::from_results(
            [Some(&evaluator_a), Some(&evaluator_b), curator.as_ref()]
                .into_iter()
                .flatten(),
        );

        Self {
            final_verdict,
            reason,
            evaluator_a,
            evaluator_b,
            curator,
            usage,
            decided_at: Utc::now(),
        }
    }

    pub fn final_verdict(&self) -> FinalVerdict {
        self.final_verdict
    }

    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    pub fn evaluator_a(&self) -> &EvaluationResult {
        &self.evaluator_a
    }

    pub fn evaluator_b(&self) -> &EvaluationResult {
        &self.evaluator_b
    }

    pub fn curator(&self) -> Option<&EvaluationResult> {
        self.curator.as_ref()
    }

    pub fn usage(&self) -> &LlmUsage {
        &self.usage
    }

    pub fn decided_at(&self) -> DateTime<Utc> {
        self.decided_at
    }

    /// Whether the decision should go to a human reviewer.
    pub fn needs_human_review(&self) -> bool {
        self.final_verdict == FinalVerdict::HumanReview
    }

    /// The result whose rationale explains the final verdict.
    ///
    /// When the curator decided, that is the curator. On unanimous agreement
    /// it is the more confident evaluator (evaluator A on ties). Confidence
    /// values are not combined.
    pub fn canonical(&self) -> &EvaluationResult {
        match &self.curator {
            Some(curator) => curator,
            None if self.evaluator_b.confidence > self.evaluator_a.confidence => {
                &self.evaluator_b
            }
            None => &self.evaluator_a,
        }
    }

    pub fn canonical_rationale(&self) -> &str {
        &self.canonical().rationale
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
