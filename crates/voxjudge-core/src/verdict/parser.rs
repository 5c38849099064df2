//! Extract a structured verdict from LLM output text.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::schema::validate_verdict_schema;
use crate::types::{EvaluationResult, UnknownVerdict, Verdict};
use crate::usage::TokenUsage;

lazy_static! {
    /// A fenced ```json block (language tag optional)
    static ref FENCED_JSON: Regex = Regex::new(
        r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```"
    ).unwrap();
}

/// Errors that can occur when parsing a verdict.
#[derive(Error, Debug)]
pub enum VerdictParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response does not match verdict schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error(transparent)]
    UnknownVerdict(#[from] UnknownVerdict),
}

/// Verdict, confidence and rationale read from one LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVerdict {
    pub verdict: Verdict,
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    confidence: f64,
    rationale: String,
}

impl ParsedVerdict {
    /// Attach call metadata to produce an [`EvaluationResult`].
    pub fn into_result(
        self,
        provider: impl Into<String>,
        model: impl Into<String>,
        latency: Duration,
        usage: TokenUsage,
    ) -> EvaluationResult {
        EvaluationResult::new(self.verdict, self.confidence, self.rationale, provider)
            .with_model(model)
            .with_latency(latency)
            .with_usage(usage)
    }
}

/// Parse the verdict out of an LLM response.
///
/// Looks for a fenced JSON block first, then the outermost `{...}` span.
/// The object must validate against the verdict schema.
pub fn parse_verdict(text: &str) -> Result<ParsedVerdict, VerdictParseError> {
    let json = extract_json_object(text).ok_or(VerdictParseError::NoJsonObject)?;
    let value: serde_json::Value = serde_json::from_str(json)?;

    if let Err(errors) = validate_verdict_schema(&value) {
        tracing::debug!(?errors, "Verdict object failed schema validation");
        return Err(VerdictParseError::Schema(errors));
    }

    let raw: RawVerdict = serde_json::from_value(value)?;
    let verdict = raw.verdict.parse::<Verdict>()?;

    Ok(ParsedVerdict {
        verdict,
        confidence: raw.confidence,
        rationale: raw.rationale.trim().to_string(),
    })
}

fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(captures) = FENCED_JSON.captures(text) {
        return captures.get(1).map(|m| m.as_str());
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
