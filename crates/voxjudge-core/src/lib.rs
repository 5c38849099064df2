//! # voxjudge-core
//!
//! Deterministic building blocks for validating voice-agent test turns.
//!
//! This crate answers, without any I/O:
//! - Is this turn well-formed enough to evaluate?
//! - What did an evaluator LLM actually say?
//! - Given two evaluator verdicts (and maybe a curator verdict), what is the
//!   final decision?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the decision table has no tuning knobs
//! 2. **No LLM calls**: provider calls live in `voxjudge-runtime`
//! 3. **Auditable**: a decision keeps every intermediate result
//! 4. **Closed verdicts**: PASS / FAIL / UNCERTAIN, PASS / FAIL / HUMAN_REVIEW
//!
//! ## Example
//!
//! ```rust
//! use voxjudge_core::{EvaluationResult, FinalVerdict, Synthesis, Synthesizer, Verdict};
//!
//! let a = EvaluationResult::new(Verdict::Pass, 0.9, "booked 2pm", "evaluator_a");
//! let b = EvaluationResult::new(Verdict::Pass, 0.8, "flight booked", "evaluator_b");
//!
//! match Synthesizer::new().synthesize(a, b) {
//!     Synthesis::Decided(decision) => assert_eq!(decision.final_verdict(), FinalVerdict::Pass),
//!     Synthesis::NeedsCurator(_) => unreachable!(),
//! }
//! ```

pub mod request;
pub mod synthesizer;
pub mod types;
pub mod usage;
pub mod verdict;

// Re-export main types at crate root
pub use request::{
    ConversationTurn, EvaluationRequest, EvaluationRequestBuilder, InvalidInputError, Speaker,
};
pub use synthesizer::{Agreement, Disputed, Synthesis, Synthesizer};
pub use types::{
    ConsensusDecision, DecisionReason, EvaluationFailure, EvaluationResult, FailureKind,
    FinalVerdict, UnknownVerdict, Verdict,
};
pub use usage::{LlmUsage, TokenUsage};
pub use verdict::{parse_verdict, ParsedVerdict, VerdictParseError};
