//! Synthesizer: reduces evaluator and curator verdicts to a final decision.
//!
//! The decision table is strict and not configurable:
//! 1. PASS/PASS → PASS (`unanimous_pass`)
//! 2. FAIL/FAIL → FAIL (`unanimous_fail`)
//! 3. Any other pair → the curator decides:
//!    - curator PASS → PASS (`curator_broke_tie_pass`)
//!    - curator FAIL → FAIL (`curator_broke_tie_fail`)
//!    - curator UNCERTAIN or failed → HUMAN_REVIEW (`curator_inconclusive`)
//!
//! Only results from successful calls count as PASS or FAIL. A degraded
//! result is always UNCERTAIN.

use crate::types::{ConsensusDecision, DecisionReason, EvaluationResult, FinalVerdict, Verdict};

/// How two evaluator verdicts relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    /// Both evaluators returned the same definitive verdict
    Unanimous(FinalVerdict, DecisionReason),

    /// The curator must break the tie
    Disputed,
}

/// Outcome of the evaluator phase.
#[derive(Debug)]
pub enum Synthesis {
    /// The evaluators agreed; no curator needed
    Decided(ConsensusDecision),

    /// The evaluators disagreed; hand the pair to the curator
    NeedsCurator(Disputed),
}

/// Evaluator results awaiting a curator verdict.
///
/// The only way to turn this into a decision is [`Synthesizer::resolve`],
/// so a disputed decision always carries a curator result.
#[derive(Debug, Clone)]
pub struct Disputed {
    evaluator_a: EvaluationResult,
    evaluator_b: EvaluationResult,
}

impl Disputed {
    pub fn evaluator_a(&self) -> &EvaluationResult {
        &self.evaluator_a
    }

    pub fn evaluator_b(&self) -> &EvaluationResult {
        &self.evaluator_b
    }
}

/// The Synthesizer applies the consensus decision table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Classify a pair of evaluator verdicts.
    pub fn classify(&self, a: Verdict, b: Verdict) -> Agreement {
        match (a, b) {
            (Verdict::Pass, Verdict::Pass) => {
                Agreement::Unanimous(FinalVerdict::Pass, DecisionReason::UnanimousPass)
            }
            (Verdict::Fail, Verdict::Fail) => {
                Agreement::Unanimous(FinalVerdict::Fail, DecisionReason::UnanimousFail)
            }
            _ => Agreement::Disputed,
        }
    }

    /// Map the curator verdict to the final verdict.
    pub fn curator_outcome(&self, curator: Verdict) -> (FinalVerdict, DecisionReason) {
        match curator {
            Verdict::Pass => (FinalVerdict::Pass, DecisionReason::CuratorBrokeTiePass),
            Verdict::Fail => (FinalVerdict::Fail, DecisionReason::CuratorBrokeTieFail),
            Verdict::Uncertain => (FinalVerdict::HumanReview, DecisionReason::CuratorInconclusive),
        }
    }

    /// Reduce the two evaluator results.
    pub fn synthesize(
        &self,
        evaluator_a: EvaluationResult,
        evaluator_b: EvaluationResult,
    ) -> Synthesis {
        match self.classify(effective(&evaluator_a), effective(&evaluator_b)) {
            Agreement::Unanimous(final_verdict, reason) => Synthesis::Decided(
                ConsensusDecision::new(final_verdict, reason, evaluator_a, evaluator_b, None),
            ),
            Agreement::Disputed => Synthesis::NeedsCurator(Disputed {
                evaluator_a,
                evaluator_b,
            }),
        }
    }

    /// Decide a disputed pair with the curator's result.
    pub fn resolve(&self, disputed: Disputed, curator: EvaluationResult) -> ConsensusDecision {
        let (final_verdict, reason) = self.curator_outcome(effective(&curator));
        ConsensusDecision::new(
            final_verdict,
            reason,
            disputed.evaluator_a,
            disputed.evaluator_b,
            Some(curator),
        )
    }
}

/// Degraded results count as UNCERTAIN whatever their verdict field says.
fn effective(result: &EvaluationResult) -> Verdict {
    if result.is_degraded() {
        Verdict::Uncertain
    } else {
        result.verdict
    }
}
