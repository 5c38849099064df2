//! Evaluator and curator adapters.
//!
//! An adapter turns one [`EvaluationRequest`](voxjudge_core::EvaluationRequest)
//! into one verdict by calling an LLM provider. The orchestrator only sees
//! the [`Evaluator`] and [`Curator`] traits.

mod curator;
mod llm;
mod traits;

pub use curator::LlmCurator;
pub use llm::LlmEvaluator;
pub use traits::{AdapterError, Curator, Evaluator};
