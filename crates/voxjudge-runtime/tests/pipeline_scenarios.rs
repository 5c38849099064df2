//! End-to-end pipeline scenarios with stub adapters.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use voxjudge_core::{
    DecisionReason, EvaluationRequest, EvaluationResult, FailureKind, FinalVerdict, Verdict,
    VerdictParseError,
};
use voxjudge_runtime::providers::ScriptedProvider;
use voxjudge_runtime::{
    AdapterError, CacheConfig, CircuitBreakerConfig, Curator, Evaluator, LlmEvaluator,
    PipelineConfig, PipelineOrchestrator, ProviderError, ProviderRegistry, RetryPolicy,
};

/// What a stub adapter does when called.
#[derive(Clone)]
enum Behavior {
    Answer(Verdict, f64),
    Unavailable,
    Garbled,
    Stall,
}

struct StubEvaluator {
    behavior: Behavior,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
}

/// Counts a call as in flight until its future completes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubEvaluator {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn act(&self, name: &str) -> Result<EvaluationResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.in_flight);
        match self.behavior {
            Behavior::Answer(verdict, confidence) => Ok(EvaluationResult::new(
                verdict,
                confidence,
                format!("{} says {}", name, verdict),
                name,
            )),
            Behavior::Unavailable => Err(AdapterError::ProviderUnavailable {
                provider: name.to_string(),
                attempts: 3,
                source: ProviderError::ApiError {
                    status: 503,
                    message: "overloaded".into(),
                },
            }),
            Behavior::Garbled => Err(AdapterError::ResponseParse {
                provider: name.to_string(),
                source: VerdictParseError::NoJsonObject,
            }),
            Behavior::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("stalled adapter resumed")
            }
        }
    }
}

#[async_trait]
impl Evaluator for StubEvaluator {
    async fn evaluate(&self, _request: &EvaluationRequest) -> Result<EvaluationResult, AdapterError> {
        self.act("stub").await
    }
}

#[async_trait]
impl Curator for StubEvaluator {
    async fn curate(
        &self,
        _request: &EvaluationRequest,
        _a: &EvaluationResult,
        _b: &EvaluationResult,
    ) -> Result<EvaluationResult, AdapterError> {
        self.act("curator").await
    }
}

struct Pipeline {
    orchestrator: PipelineOrchestrator,
    a: Arc<StubEvaluator>,
    b: Arc<StubEvaluator>,
    curator: Arc<StubEvaluator>,
}

fn pipeline(a: Behavior, b: Behavior, curator: Behavior) -> Pipeline {
    pipeline_with(a, b, curator, |builder| builder)
}

fn pipeline_with(
    a: Behavior,
    b: Behavior,
    curator: Behavior,
    configure: impl FnOnce(
        voxjudge_runtime::PipelineOrchestratorBuilder,
    ) -> voxjudge_runtime::PipelineOrchestratorBuilder,
) -> Pipeline {
    let a = StubEvaluator::new(a);
    let b = StubEvaluator::new(b);
    let curator = StubEvaluator::new(curator);

    let builder = PipelineOrchestrator::builder()
        .evaluator_a("stub-a", a.clone())
        .evaluator_b("stub-b", b.clone())
        .curator("stub-curator", curator.clone())
        .evaluation_timeout(Duration::from_secs(30))
        .curator_timeout(Duration::from_secs(30));

    Pipeline {
        orchestrator: configure(builder).build().unwrap(),
        a,
        b,
        curator,
    }
}

fn flight_request() -> EvaluationRequest {
    EvaluationRequest::new("book a 2pm flight", "booked a 2pm flight to Boston").unwrap()
}

#[tokio::test]
async fn unanimous_pass_skips_curator() {
    let p = pipeline(
        Behavior::Answer(Verdict::Pass, 0.92),
        Behavior::Answer(Verdict::Pass, 0.81),
        Behavior::Answer(Verdict::Fail, 0.9),
    );

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(decision.final_verdict(), FinalVerdict::Pass);
    assert_eq!(decision.reason(), DecisionReason::UnanimousPass);
    assert!(decision.curator().is_none());
    assert_eq!(p.curator.calls(), 0);
    assert_eq!(decision.canonical().confidence, 0.92);
}

#[tokio::test]
async fn unanimous_fail_skips_curator() {
    let p = pipeline(
        Behavior::Answer(Verdict::Fail, 0.7),
        Behavior::Answer(Verdict::Fail, 0.9),
        Behavior::Answer(Verdict::Pass, 0.9),
    );

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(decision.final_verdict(), FinalVerdict::Fail);
    assert_eq!(decision.reason(), DecisionReason::UnanimousFail);
    assert_eq!(p.curator.calls(), 0);
}

#[tokio::test]
async fn disagreement_is_broken_by_curator() {
    // Expected "confirm the booking", response never confirms
    let request = EvaluationRequest::new("confirm the booking", "Let me look into flights for you.").unwrap();
    let p = pipeline(
        Behavior::Answer(Verdict::Pass, 0.55),
        Behavior::Answer(Verdict::Fail, 0.85),
        Behavior::Answer(Verdict::Fail, 0.9),
    );

    let decision = p.orchestrator.run(&request).await.unwrap();

    assert_eq!(decision.final_verdict(), FinalVerdict::Fail);
    assert_eq!(decision.reason(), DecisionReason::CuratorBrokeTieFail);
    assert_eq!(decision.curator().unwrap().verdict, Verdict::Fail);
    assert_eq!(decision.evaluator_a().verdict, Verdict::Pass);
    assert_eq!(decision.evaluator_b().verdict, Verdict::Fail);
    assert_eq!(p.curator.calls(), 1);
}

#[tokio::test]
async fn curator_pass_breaks_tie_pass() {
    let p = pipeline(
        Behavior::Answer(Verdict::Uncertain, 0.4),
        Behavior::Answer(Verdict::Pass, 0.8),
        Behavior::Answer(Verdict::Pass, 0.75),
    );

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();
    assert_eq!(decision.reason(), DecisionReason::CuratorBrokeTiePass);
    assert_eq!(decision.final_verdict(), FinalVerdict::Pass);
}

#[tokio::test]
async fn provider_outage_and_uncertain_curator_need_human_review() {
    let p = pipeline(
        Behavior::Unavailable,
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Answer(Verdict::Uncertain, 0.3),
    );

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(decision.final_verdict(), FinalVerdict::HumanReview);
    assert_eq!(decision.reason(), DecisionReason::CuratorInconclusive);
    assert!(decision.needs_human_review());

    let a = decision.evaluator_a();
    assert_eq!(a.verdict, Verdict::Uncertain);
    assert_eq!(a.provider, "stub-a");
    assert_eq!(a.failure.as_ref().unwrap().kind, FailureKind::ProviderUnavailable);
}

#[tokio::test]
async fn garbled_output_counts_as_uncertain() {
    let p = pipeline(
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Garbled,
        Behavior::Answer(Verdict::Pass, 0.8),
    );

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(decision.reason(), DecisionReason::CuratorBrokeTiePass);
    assert_eq!(
        decision.evaluator_b().failure.as_ref().unwrap().kind,
        FailureKind::ResponseParse
    );
}

#[tokio::test]
async fn curator_failure_needs_human_review() {
    let p = pipeline(
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Answer(Verdict::Fail, 0.9),
        Behavior::Unavailable,
    );

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(decision.final_verdict(), FinalVerdict::HumanReview);
    assert_eq!(decision.reason(), DecisionReason::CuratorInconclusive);
    assert!(decision.curator().unwrap().is_degraded());
}

#[tokio::test]
async fn uncertain_pair_goes_to_curator() {
    let p = pipeline(
        Behavior::Answer(Verdict::Uncertain, 0.4),
        Behavior::Answer(Verdict::Uncertain, 0.3),
        Behavior::Answer(Verdict::Fail, 0.7),
    );

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();
    assert_eq!(decision.reason(), DecisionReason::CuratorBrokeTieFail);
    assert_eq!(p.curator.calls(), 1);
}

#[tokio::test]
async fn same_verdicts_same_decision() {
    let p = pipeline(
        Behavior::Answer(Verdict::Pass, 0.6),
        Behavior::Answer(Verdict::Fail, 0.6),
        Behavior::Answer(Verdict::Pass, 0.6),
    );

    let first = p.orchestrator.run(&flight_request()).await.unwrap();
    let second = p.orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(first.final_verdict(), second.final_verdict());
    assert_eq!(first.reason(), second.reason());
    assert_eq!(first.evaluator_a(), second.evaluator_a());
    assert_eq!(first.curator(), second.curator());
}

#[tokio::test(start_paused = true)]
async fn stalled_evaluator_times_out_as_uncertain() {
    let p = pipeline_with(
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Stall,
        Behavior::Answer(Verdict::Pass, 0.8),
        |builder| builder.evaluation_timeout(Duration::from_secs(10)),
    );

    let start = Instant::now();
    let decision = p.orchestrator.run(&flight_request()).await.unwrap();

    // Curator answers at once, so the run ends at the evaluation deadline
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert_eq!(p.b.in_flight(), 0);

    // A answered in time and keeps its verdict
    assert_eq!(decision.evaluator_a().verdict, Verdict::Pass);
    assert!(!decision.evaluator_a().is_degraded());

    let b = decision.evaluator_b();
    assert_eq!(b.verdict, Verdict::Uncertain);
    assert_eq!(b.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert_eq!(decision.reason(), DecisionReason::CuratorBrokeTiePass);
}

#[tokio::test(start_paused = true)]
async fn both_stalled_and_curator_stalled() {
    let p = pipeline_with(
        Behavior::Stall,
        Behavior::Stall,
        Behavior::Stall,
        |builder| {
            builder
                .evaluation_timeout(Duration::from_secs(10))
                .curator_timeout(Duration::from_secs(10))
        },
    );

    let start = Instant::now();
    let decision = p.orchestrator.run(&flight_request()).await.unwrap();

    assert!(start.elapsed() <= Duration::from_secs(20));
    assert_eq!(p.a.in_flight() + p.b.in_flight() + p.curator.in_flight(), 0);

    assert_eq!(decision.final_verdict(), FinalVerdict::HumanReview);
    assert_eq!(decision.reason(), DecisionReason::CuratorInconclusive);
    assert_eq!(
        decision.curator().unwrap().failure.as_ref().unwrap().kind,
        FailureKind::Timeout
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_run_abandons_evaluator_calls() {
    let p = pipeline(Behavior::Stall, Behavior::Stall, Behavior::Stall);
    let request = flight_request();

    let mut run = Box::pin(p.orchestrator.run(&request));
    let polled = tokio::time::timeout(Duration::from_secs(1), run.as_mut()).await;
    assert!(polled.is_err());
    assert_eq!(p.a.in_flight(), 1);
    assert_eq!(p.b.in_flight(), 1);

    drop(run);

    assert_eq!(p.a.in_flight(), 0);
    assert_eq!(p.b.in_flight(), 0);
    assert_eq!(p.curator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_surfaces_uncertain() {
    let flaky = Arc::new(
        ScriptedProvider::new("flaky")
            .fail(ProviderError::HttpError("connection reset".into()))
            .fail(ProviderError::RateLimited { retry_after: None })
            .fail(ProviderError::ApiError {
                status: 500,
                message: "internal".into(),
            }),
    );
    let evaluator = LlmEvaluator::new(flaky.clone(), Default::default()).with_retry(
        RetryPolicy::new(2).with_delays(Duration::from_millis(10), Duration::from_millis(50)),
    );

    let b = StubEvaluator::new(Behavior::Answer(Verdict::Fail, 0.9));
    let curator = StubEvaluator::new(Behavior::Answer(Verdict::Fail, 0.9));
    let orchestrator = PipelineOrchestrator::builder()
        .evaluator_a("flaky", Arc::new(evaluator))
        .evaluator_b("stub-b", b)
        .curator("stub-curator", curator)
        .build()
        .unwrap();

    let decision = orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(flaky.calls(), 3);
    let a = decision.evaluator_a();
    assert_eq!(a.verdict, Verdict::Uncertain);
    assert_eq!(a.failure.as_ref().unwrap().kind, FailureKind::ProviderUnavailable);
    assert_eq!(decision.reason(), DecisionReason::CuratorBrokeTieFail);
}

#[test]
fn invalid_request_is_rejected_before_dispatch() {
    let err = EvaluationRequest::from_yaml("expected_behavior: \"\"\nactual_response: booked\n")
        .unwrap_err();
    assert!(err.to_string().to_lowercase().contains("expected"));
}

#[tokio::test]
async fn open_circuit_skips_slot() {
    let p = pipeline_with(
        Behavior::Unavailable,
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Answer(Verdict::Pass, 0.9),
        |builder| {
            builder.circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(600),
                success_threshold: 1,
            })
        },
    );

    for _ in 0..2 {
        p.orchestrator.run(&flight_request()).await.unwrap();
    }
    assert_eq!(p.a.calls(), 2);

    let decision = p.orchestrator.run(&flight_request()).await.unwrap();
    assert_eq!(p.a.calls(), 2, "open circuit must not call the adapter");
    assert_eq!(
        decision.evaluator_a().failure.as_ref().unwrap().kind,
        FailureKind::CircuitOpen
    );
    assert_eq!(decision.usage().llm_calls, 2);
}

#[tokio::test]
async fn cache_reuses_definitive_verdicts() {
    let p = pipeline_with(
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Answer(Verdict::Uncertain, 0.4),
        Behavior::Answer(Verdict::Pass, 0.8),
        |builder| builder.cache(CacheConfig::default()),
    );

    p.orchestrator.run(&flight_request()).await.unwrap();
    let second = p.orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(p.a.calls(), 1);
    assert_eq!(p.b.calls(), 2, "UNCERTAIN is never cached");
    assert!(second.evaluator_a().cached);
    assert_eq!(second.usage().cache_hits, 1);
}

#[tokio::test]
async fn batch_keeps_input_order() {
    let p = pipeline(
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Answer(Verdict::Pass, 0.9),
        Behavior::Answer(Verdict::Pass, 0.9),
    );
    let requests: Vec<_> = ["first", "second", "third"]
        .iter()
        .map(|text| EvaluationRequest::new("greet the caller", *text).unwrap())
        .collect();

    let results = p.orchestrator.run_batch(&requests, 2).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(p.a.calls(), 3);
}

#[tokio::test]
async fn scripted_config_end_to_end() {
    let yaml = r#"
evaluation_timeout: 5s
curator_timeout: 5s
evaluator_a:
  provider: scripted
  model: dry-run-a
  scripted_responses:
    - '{"verdict":"PASS","confidence":0.9,"rationale":"booked the 2pm flight"}'
evaluator_b:
  provider: scripted
  model: dry-run-b
  template: goal_oriented
  scripted_responses:
    - '```json
      {"verdict":"FAIL","confidence":0.6,"rationale":"no confirmation number"}
      ```'
curator:
  provider: scripted
  model: dry-run-curator
  scripted_responses:
    - '{"verdict":"PASS","confidence":0.8,"rationale":"booking confirmed verbally"}'
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let orchestrator =
        PipelineOrchestrator::from_config(&config, &ProviderRegistry::with_defaults()).unwrap();

    let decision = orchestrator.run(&flight_request()).await.unwrap();

    assert_eq!(decision.reason(), DecisionReason::CuratorBrokeTiePass);
    assert_eq!(decision.evaluator_b().model.as_deref(), Some("dry-run-b"));
    assert_eq!(decision.evaluator_a().provider, "scripted:dry-run-a");
    assert_eq!(decision.evaluator_b().provider, "scripted:dry-run-b");
    assert_eq!(decision.curator().unwrap().provider, "scripted:dry-run-curator");
    assert_eq!(decision.canonical_rationale(), "booking confirmed verbally");
    assert_eq!(decision.usage().llm_calls, 3);

    let json = serde_json::to_value(&decision).unwrap();
    assert_eq!(json["final_verdict"], "PASS");
    assert_eq!(json["reason"], "curator_broke_tie_pass");
}
