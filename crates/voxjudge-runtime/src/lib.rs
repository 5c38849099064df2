//! # voxjudge-runtime
//!
//! LLM-backed consensus validation for voice-agent test turns.
//!
//! Two evaluators judge a turn concurrently. When they agree on PASS or
//! FAIL that is the decision; otherwise a curator breaks the tie, and if
//! the curator cannot decide the turn goes to human review.
//!
//! The decision table itself lives in `voxjudge-core` and never makes LLM
//! calls. This crate adds the provider clients, retries, timeouts and the
//! orchestration around it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use voxjudge_runtime::{PipelineConfig, PipelineOrchestrator, ProviderRegistry};
//! use voxjudge_core::EvaluationRequest;
//!
//! let config = PipelineConfig::from_yaml_file("pipeline.yaml")?;
//! let pipeline = PipelineOrchestrator::from_config(&config, &ProviderRegistry::with_defaults())?;
//!
//! let request = EvaluationRequest::new("book a 2pm flight", "booked a 2pm flight to Boston")?;
//! let decision = pipeline.run(&request).await?;
//! println!("{} ({})", decision.final_verdict(), decision.reason());
//! ```

pub mod cache;
pub mod config;
pub mod evaluators;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;

/// Slot name of the first evaluator.
pub const SLOT_EVALUATOR_A: &str = "evaluator_a";

/// Slot name of the second evaluator.
pub const SLOT_EVALUATOR_B: &str = "evaluator_b";

/// Slot name of the tie-breaker.
pub const SLOT_CURATOR: &str = "curator";

pub use cache::{CacheConfig, VerdictCache};
pub use config::{ConfigError, PipelineConfig, SlotConfig};
pub use evaluators::{AdapterError, Curator, Evaluator, LlmCurator, LlmEvaluator};
pub use orchestrator::{PipelineOrchestrator, PipelineOrchestratorBuilder, RuntimeError};
pub use prompts::PromptTemplate;
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
