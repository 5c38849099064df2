//! Prompts for evaluator and curator calls.
//!
//! Prompts are laid out for cache efficiency:
//! 1. Base system prompt (shared by every call) - cached
//! 2. Template-specific instructions - cached
//! 3. The turn under test - not cached

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use voxjudge_core::{EvaluationRequest, EvaluationResult, Speaker};

use crate::providers::ChatMessage;

/// Base system prompt shared by evaluators and the curator.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are a Turn Evaluator for an automated voice-assistant test suite.

Your role is to decide whether one response from a voice agent satisfies
the expected behavior written by a test author.
You do not grade style, voice, or politeness unless the expected behavior asks for it.
You do not invent requirements.

## Evaluation Constraints
1. Judge ONLY against the expected behavior you are given
2. Speech-to-text artifacts (casing, filler words, minor mis-transcriptions) are not failures
3. If the response is ambiguous or the transcript is insufficient, return UNCERTAIN
4. UNCERTAIN is a valid outcome; a human will review it

## Output Format (JSON only)
{
  "verdict": "PASS" | "FAIL" | "UNCERTAIN",
  "confidence": 0.0-1.0,
  "rationale": "one or two sentences citing what the agent said or did"
}

## Confidence Guidelines
- >= 0.8: the response clearly does or does not meet the expected behavior
- 0.5 - 0.8: mostly clear, minor interpretive ambiguity
- < 0.5: insufficient evidence - you MUST return UNCERTAIN
"#;

/// Instructions for the literal behavior-matching evaluator.
pub const BEHAVIORAL_PROMPT: &str = r#"
## Evaluation Style: Behavioral Match

Question:
Did the agent perform the expected behavior as specified?

Check each concrete detail in the expected behavior (times, dates, names,
amounts, destinations, confirmations). A missing or wrong detail is a FAIL.
Extra helpful information is acceptable unless it contradicts the expectation.
"#;

/// Instructions for the goal-oriented evaluator.
pub const GOAL_ORIENTED_PROMPT: &str = r#"
## Evaluation Style: Caller Goal

Question:
Would the caller's goal, as expressed in the expected behavior and the
conversation so far, be accomplished by this response?

Use the conversation history and intent metadata. Paraphrases and different
wording are fine when the outcome for the caller is the same. A response that
leaves the caller worse off or misinformed is a FAIL.
"#;

/// Instructions for the curator.
pub const CURATOR_PROMPT: &str = r#"
## Role: Curator

Two independent evaluators did not agree on this turn. You are the tie-breaker.

Read both evaluations, then judge the turn yourself against the expected
behavior. Do not average the evaluators and do not side with the more
confident one by default. If neither evaluation convinces you and the
transcript does not settle the question, return UNCERTAIN so that a human
reviews the turn.
"#;

/// Which evaluator instructions to use for a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    #[default]
    Behavioral,
    GoalOriented,
}

impl PromptTemplate {
    pub fn instructions(self) -> &'static str {
        match self {
            PromptTemplate::Behavioral => BEHAVIORAL_PROMPT,
            PromptTemplate::GoalOriented => GOAL_ORIENTED_PROMPT,
        }
    }
}

/// Messages for an evaluator call.
pub fn evaluator_messages(template: PromptTemplate, request: &EvaluationRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!("{}{}", BASE_SYSTEM_PROMPT, template.instructions())),
        ChatMessage::user(render_turn(request)),
    ]
}

/// Messages for a curator call.
pub fn curator_messages(
    request: &EvaluationRequest,
    result_a: &EvaluationResult,
    result_b: &EvaluationResult,
) -> Vec<ChatMessage> {
    let mut user = render_turn(request);
    user.push_str("\n## Evaluations\n");
    render_evaluation(&mut user, "Evaluator A", result_a);
    render_evaluation(&mut user, "Evaluator B", result_b);
    user.push_str("\nReturn your own verdict as JSON.\n");

    vec![
        ChatMessage::system(format!("{}{}", BASE_SYSTEM_PROMPT, CURATOR_PROMPT)),
        ChatMessage::user(user),
    ]
}

fn render_turn(request: &EvaluationRequest) -> String {
    let mut out = String::new();

    if !request.intent().is_empty() {
        out.push_str("## Intent\n");
        for (key, value) in request.intent() {
            let _ = writeln!(out, "- {}: {}", key, value);
        }
        out.push('\n');
    }

    if !request.conversation_history().is_empty() {
        out.push_str("## Conversation So Far\n");
        for turn in request.conversation_history() {
            let speaker = match turn.speaker {
                Speaker::User => "Caller",
                Speaker::Agent => "Agent",
            };
            let _ = writeln!(out, "{}: {}", speaker, turn.text);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Expected Behavior\n{}\n", request.expected_behavior());
    let _ = writeln!(out, "## Actual Agent Response\n{}", request.actual_response());
    out
}

fn render_evaluation(out: &mut String, label: &str, result: &EvaluationResult) {
    let _ = writeln!(
        out,
        "### {}\nverdict: {}\nconfidence: {:.2}\nrationale: {}",
        label, result.verdict, result.confidence, result.rationale
    );
    if let Some(failure) = &result.failure {
        let _ = writeln!(out, "note: this evaluator did not complete ({:?})", failure.kind);
    }
}
