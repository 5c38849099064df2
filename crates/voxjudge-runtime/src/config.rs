//! Pipeline configuration.
//!
//! Loaded from YAML; durations use humantime syntax (`"30s"`, `"1500ms"`).
//!
//! ```yaml
//! evaluation_timeout: 30s
//! curator_timeout: 30s
//! evaluator_a:
//!   provider: anthropic
//!   model: claude-sonnet-4-5
//!   template: behavioral
//! evaluator_b:
//!   provider: openai
//!   model: gpt-4o
//!   template: goal_oriented
//! curator:
//!   provider: anthropic
//!   model: claude-opus-4-5
//!   timeout: 20s
//!   max_retries: 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::prompts::PromptTemplate;
use crate::providers::CompletionConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration for {slot}: {message}")]
    Invalid { slot: String, message: String },
}

/// Configuration of the whole evaluator + curator pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for the concurrent evaluator phase
    #[serde(default = "default_phase_timeout", with = "humantime_duration")]
    pub evaluation_timeout: Duration,

    /// Deadline for the curator call (all retries included)
    #[serde(default = "default_phase_timeout", with = "humantime_duration")]
    pub curator_timeout: Duration,

    pub evaluator_a: SlotConfig,

    pub evaluator_b: SlotConfig,

    pub curator: SlotConfig,

    /// Skip a slot after repeated failures (off unless configured)
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Cache definitive verdicts for identical turns (off unless configured)
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

impl PipelineConfig {
    /// Parse configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// The three slots with their names.
    pub fn slots(&self) -> [(&'static str, &SlotConfig); 3] {
        [
            (crate::SLOT_EVALUATOR_A, &self.evaluator_a),
            (crate::SLOT_EVALUATOR_B, &self.evaluator_b),
            (crate::SLOT_CURATOR, &self.curator),
        ]
    }

    /// Check structural constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_timeout.is_zero() {
            return Err(invalid("pipeline", "evaluation_timeout must be greater than zero"));
        }
        if self.curator_timeout.is_zero() {
            return Err(invalid("pipeline", "curator_timeout must be greater than zero"));
        }
        for (name, slot) in self.slots() {
            slot.validate(name)?;
        }
        Ok(())
    }
}

/// Provider settings for one pipeline slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Provider type registered in the `ProviderRegistry` (e.g. "anthropic")
    pub provider: String,

    /// Base URL override
    #[serde(default)]
    pub endpoint: Option<String>,

    pub model: String,

    /// API key; prefer `api_key_env` outside of local testing
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key (provider default if unset)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Per-attempt request timeout
    #[serde(default = "default_request_timeout", with = "humantime_duration")]
    pub timeout: Duration,

    /// Retries after the first attempt for transient provider errors
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_min_delay", with = "humantime_duration")]
    pub retry_min_delay: Duration,

    #[serde(default = "default_retry_max_delay", with = "humantime_duration")]
    pub retry_max_delay: Duration,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Prompt template (ignored for the curator slot)
    #[serde(default)]
    pub template: PromptTemplate,

    #[serde(default = "default_true")]
    pub prompt_caching: bool,

    /// Canned responses for the `scripted` provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripted_responses: Vec<String>,
}

impl SlotConfig {
    /// Settings with defaults for everything but provider and model.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            endpoint: None,
            model: model.into(),
            api_key: None,
            api_key_env: None,
            timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_min_delay: default_retry_min_delay(),
            retry_max_delay: default_retry_max_delay(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            template: PromptTemplate::default(),
            prompt_caching: true,
            scripted_responses: Vec::new(),
        }
    }

    /// Completion parameters for calls made from this slot.
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout,
            prompt_caching: self.prompt_caching,
        }
    }

    /// Retry policy for calls made from this slot.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_delays(self.retry_min_delay, self.retry_max_delay)
    }

    /// Upper bound on one adapter call: every attempt times out plus backoff.
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_retries as u32 + 1;
        self.timeout * attempts + self.retry_max_delay * self.max_retries as u32
    }

    fn validate(&self, slot: &str) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(invalid(slot, "provider must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(invalid(slot, "model must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(invalid(slot, "timeout must be greater than zero"));
        }
        if self.retry_min_delay > self.retry_max_delay {
            return Err(invalid(slot, "retry_min_delay must not exceed retry_max_delay"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(slot, "temperature must be within 0.0..=2.0"));
        }
        if let Some(url) = &self.endpoint {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(slot, "endpoint must start with http:// or https://"));
            }
        }
        Ok(())
    }
}

fn invalid(slot: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        slot: slot.to_string(),
        message: message.to_string(),
    }
}

fn default_phase_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_retries() -> usize {
    2
}

fn default_retry_min_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_tokens() -> u32 {
    400
}

fn default_true() -> bool {
    true
}

/// Serialize durations as humantime strings ("1m 30s"), accept "250ms", "30s".
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
