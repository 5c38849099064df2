//! The turn being validated.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors for malformed evaluation requests.
///
/// This is the only failure the pipeline surfaces to its caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInputError {
    #[error("expected behavior must not be empty")]
    EmptyExpectedBehavior,

    #[error("actual response must not be empty")]
    EmptyActualResponse,

    #[error("failed to parse evaluation request: {0}")]
    Malformed(String),
}

/// Who spoke in a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

/// One prior exchange in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent,
            text: text.into(),
        }
    }
}

/// Immutable description of one turn to validate.
///
/// Fields are private; the value cannot change after construction and every
/// adapter receives it by shared reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEvaluationRequest")]
pub struct EvaluationRequest {
    expected_behavior: String,
    actual_response: String,
    conversation_history: Vec<ConversationTurn>,
    intent: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawEvaluationRequest {
    expected_behavior: String,
    actual_response: String,
    #[serde(default)]
    conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    intent: BTreeMap<String, String>,
}

impl TryFrom<RawEvaluationRequest> for EvaluationRequest {
    type Error = InvalidInputError;

    fn try_from(raw: RawEvaluationRequest) -> Result<Self, Self::Error> {
        EvaluationRequestBuilder::new(raw.expected_behavior, raw.actual_response)
            .history(raw.conversation_history)
            .intents(raw.intent)
            .build()
    }
}

impl EvaluationRequest {
    /// Create a request without context.
    pub fn new(
        expected_behavior: impl Into<String>,
        actual_response: impl Into<String>,
    ) -> Result<Self, InvalidInputError> {
        EvaluationRequestBuilder::new(expected_behavior, actual_response).build()
    }

    /// Start building a request with conversation history and intent metadata.
    pub fn builder(
        expected_behavior: impl Into<String>,
        actual_response: impl Into<String>,
    ) -> EvaluationRequestBuilder {
        EvaluationRequestBuilder::new(expected_behavior, actual_response)
    }

    /// Parse a request from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, InvalidInputError> {
        serde_yaml::from_str(yaml).map_err(|e| InvalidInputError::Malformed(e.to_string()))
    }

    /// Parse a request from JSON.
    pub fn from_json(json: &str) -> Result<Self, InvalidInputError> {
        serde_json::from_str(json).map_err(|e| InvalidInputError::Malformed(e.to_string()))
    }

    pub fn expected_behavior(&self) -> &str {
        &self.expected_behavior
    }

    pub fn actual_response(&self) -> &str {
        &self.actual_response
    }

    pub fn conversation_history(&self) -> &[ConversationTurn] {
        &self.conversation_history
    }

    pub fn intent(&self) -> &BTreeMap<String, String> {
        &self.intent
    }

    /// Re-check the input constraints.
    pub fn validate(&self) -> Result<(), InvalidInputError> {
        validate_fields(&self.expected_behavior, &self.actual_response)
    }

    /// Hash over every field; stable for the lifetime of the process.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

fn validate_fields(expected: &str, actual: &str) -> Result<(), InvalidInputError> {
    if expected.trim().is_empty() {
        return Err(InvalidInputError::EmptyExpectedBehavior);
    }
    if actual.trim().is_empty() {
        return Err(InvalidInputError::EmptyActualResponse);
    }
    Ok(())
}

/// Builder for [`EvaluationRequest`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct EvaluationRequestBuilder {
    expected_behavior: String,
    actual_response: String,
    conversation_history: Vec<ConversationTurn>,
    intent: BTreeMap<String, String>,
}

impl EvaluationRequestBuilder {
    pub fn new(expected_behavior: impl Into<String>, actual_response: impl Into<String>) -> Self {
        Self {
            expected_behavior: expected_behavior.into(),
            actual_response: actual_response.into(),
            conversation_history: Vec::new(),
            intent: BTreeMap::new(),
        }
    }

    /// Append a prior conversation turn.
    pub fn turn(mut self, turn: ConversationTurn) -> Self {
        self.conversation_history.push(turn);
        self
    }

    pub fn history(mut self, turns: impl IntoIterator<Item = ConversationTurn>) -> Self {
        self.conversation_history.extend(turns);
        self
    }

    /// Add an intent metadata entry (e.g. `intent_name`, `scenario_id`).
    pub fn intent(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.intent.insert(key.into(), value.into());
        self
    }

    pub fn intents(mut self, entries: impl IntoIterator<Item = (String, String)>) -> Self {
        self.intent.extend(entries);
        self
    }

    pub fn build(self) -> Result<EvaluationRequest, InvalidInputError> {
        validate_fields(&self.expected_behavior, &self.actual_response)?;
        Ok(EvaluationRequest {
            expected_behavior: self.expected_behavior,
            actual_response: self.actual_response,
            conversation_history: self.conversation_history,
            intent: self.intent,
        })
    }
}
