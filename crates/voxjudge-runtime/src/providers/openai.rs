//! OpenAI-compatible chat completions provider.
//!
//! Works against api.openai.com and any endpoint exposing
//! `POST {base_url}/chat/completions` with bearer auth.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use crate::config::SlotConfig;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
    client: Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_credential(
            ApiCredential::new(api_key, CredentialSource::Programmatic, "OpenAI API key"),
            DEFAULT_BASE_URL,
        )
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(OPENAI_API_KEY_ENV, "OpenAI API key")?;
        Self::with_credential(credential, DEFAULT_BASE_URL)
    }

    pub fn from_settings(settings: &SlotConfig) -> Result<Self, ProviderError> {
        let env_var = settings.api_key_env.as_deref().unwrap_or(OPENAI_API_KEY_ENV);
        let credential = ApiCredential::from_setting_or_env(
            settings.api_key.as_deref(),
            env_var,
            "OpenAI API key",
        )?;
        let base_url = settings.endpoint.as_deref().unwrap_or(DEFAULT_BASE_URL);

        Self::with_credential(credential, base_url)
    }

    fn with_credential(credential: ApiCredential, base_url: &str) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

fn parse_response(body: &str, requested_model: &str) -> Result<CompletionResponse, ProviderError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::ParseError(e.to_string()))?;

    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        ProviderError::ParseError("response did not contain any choices".to_string())
    })?;

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            cache_read_tokens: u.prompt_tokens_details.map_or(0, |d| d.cached_tokens),
            cache_creation_tokens: 0,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        usage,
        model: parsed.model.unwrap_or_else(|| requested_model.to_string()),
        stop_reason: choice.finish_reason,
    })
}

fn error_for_status(status: u16, body: &str) -> ProviderError {
    if status == 401 || status == 403 {
        return ProviderError::AuthError;
    }
    let message = serde_json::from_str::<OpenAiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("unexpected status {status}: {}", body.chars().take(200).collect::<String>()));
    ProviderError::ApiError { status, message }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = OpenAiRequestBody {
            model: &config.model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        if !status.is_success() {
            return Err(error_for_status(status.as_u16(), &text));
        }

        parse_response(&text, &config.model)
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, settings: &SlotConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_settings(settings)?))
    }

    fn validate_config(&self, settings: &SlotConfig) -> Result<(), ProviderError> {
        let env_var = settings.api_key_env.as_deref().unwrap_or(OPENAI_API_KEY_ENV);
        if !ApiCredential::is_available(settings.api_key.as_deref(), env_var) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in config or {} env",
                env_var
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible chat completions provider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        let provider = OpenAiProvider::new("sk-test")
            .unwrap()
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            provider.endpoint("/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::system("rules"), ChatMessage::user("turn")];
        let config = CompletionConfig {
            model: "gpt-4o".to_string(),
            ..Default::default()
        };
        let body = OpenAiRequestBody {
            model: &config.model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_parse_response_body() {
        let body = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"verdict\":\"FAIL\"}"},
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 500,
                "completion_tokens": 30,
                "total_tokens": 530,
                "prompt_tokens_details": {"cached_tokens": 256}
            }
        }"#;

        let response = parse_response(body, "gpt-4o").unwrap();
        assert_eq!(response.content, "{\"verdict\":\"FAIL\"}");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert_eq!(response.usage.prompt_tokens, 500);
        assert_eq!(response.usage.cache_read_tokens, 256);
        assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let body = r#"{"choices": []}"#;
        assert!(matches!(
            parse_response(body, "gpt-4o"),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_error_status_mapping() {
        assert!(matches!(error_for_status(403, ""), ProviderError::AuthError));

        let err = error_for_status(
            400,
            r#"{"error":{"message":"Invalid model","type":"invalid_request_error"}}"#,
        );
        assert!(matches!(
            &err,
            ProviderError::ApiError { status: 400, message } if message == "Invalid model"
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let provider = OpenAiProvider::new("sk-proj-very-secret").unwrap();
        let debug_output = format!("{:?}", provider);
        assert!(!debug_output.contains("sk-proj-very-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
