//! Shared vendor backend plumbing.
//!
//! Provides the provider configuration, token accounting and the HTTP
//! helpers every vendor client goes through.

use crate::error::LlmError;
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Responses API.
    OpenAi,
    /// Google Gemini generateContent API.
    Gemini,
}

impl LlmProvider {
    /// Returns the provider name used in errors and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

/// Configuration for an LLM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmBackendConfig {
    /// The provider type.
    pub provider: LlmProvider,
    /// Base URL for the API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// API key (if required).
    pub api_key: Option<String>,
    /// Additional provider-specific options.
    pub options: HashMap<String, JsonValue>,
}

impl LlmBackendConfig {
    /// Creates a new OpenAI backend configuration.
    #[must_use]
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            api_key: Some(api_key.into()),
            options: HashMap::new(),
        }
    }

    /// Creates a new Anthropic backend configuration.
    #[must_use]
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            model: model.into(),
            api_key: Some(api_key.into()),
            options: HashMap::new(),
        }
    }

    /// Creates a new Gemini backend configuration.
    #[must_use]
    pub fn gemini(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Gemini,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: model.into(),
            api_key: Some(api_key.into()),
            options: HashMap::new(),
        }
    }

    /// Overrides the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Returns the API key, failing when it is missing or blank.
    pub fn require_api_key(&self) -> Result<&str, Report<LlmError>> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(LlmError::InvalidConfig {
                reason: format!("{} API key is not set", self.provider.as_str()),
            }
            .into()),
        }
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The counterpart's turns.
    User,
    /// The model's own turns.
    Assistant,
    /// System message.
    System,
    /// Operator instructions (OpenAI only).
    Developer,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u64,
    /// Number of output tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Creates a usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Adds another usage record to this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Builds the HTTP client shared by a vendor client.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, Report<LlmError>> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| {
            LlmError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            }
            .into()
        })
}

/// Sends a prepared request and decodes a JSON body.
///
/// Non-success statuses are mapped to [`LlmError::ApiStatus`] (or
/// [`LlmError::RateLimited`] for 429) with the response body attached.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: LlmProvider,
    request: reqwest::RequestBuilder,
) -> Result<T, Report<LlmError>> {
    let name = provider.as_str();
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            LlmError::Timeout {
                provider: name.to_string(),
            }
        } else {
            LlmError::RequestFailed {
                provider: name.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(LlmError::RateLimited {
            provider: name.to_string(),
            retry_after_secs,
        }
        .into());
    }

    let body = response.text().await.map_err(|e| LlmError::RequestFailed {
        provider: name.to_string(),
        reason: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(LlmError::ApiStatus {
            provider: name.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }

    debug!(provider = name, bytes = body.len(), "received response");

    serde_json::from_str(&body).map_err(|e| {
        LlmError::ResponseParseFailed {
            provider: name.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_total_and_add() {
        let mut usage = TokenUsage::new(100, 50);
        assert_eq!(usage.total(), 150);
        usage.add(TokenUsage::new(10, 5));
        assert_eq!(usage, TokenUsage::new(110, 55));
    }

    #[test]
    fn backend_config_serde() {
        let config = LlmBackendConfig::anthropic("sk-test", "claude-sonnet");
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: LlmBackendConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(config.provider, parsed.provider);
        assert_eq!(config.model, parsed.model);
    }

    #[test]
    fn missing_api_key_is_invalid_config() {
        let mut config = LlmBackendConfig::openai("  ", "gpt");
        assert!(config.require_api_key().is_err());
        config.api_key = Some("sk-live".to_string());
        assert_eq!(config.require_api_key().expect("key"), "sk-live");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = LlmBackendConfig::openai("k", "m").with_base_url("http://localhost:9000/v1/");
        assert_eq!(config.endpoint("responses"), "http://localhost:9000/v1/responses");
    }
}
