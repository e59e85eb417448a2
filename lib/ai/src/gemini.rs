//! Gemini single-shot client.

use crate::backend::{LlmBackendConfig, LlmProvider, http_client, send_json};
use crate::error::LlmError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::instrument;

/// A stateless prompt-in, text-out service.
#[async_trait]
pub trait SingleShotApi: Send + Sync {
    /// Sends one prompt and returns the generated text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or yields no text.
    async fn generate(&self, prompt: &str) -> Result<String, Report<LlmError>>;
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }
}

/// HTTP client for the Gemini generateContent API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: LlmBackendConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    /// Creates a client from a backend configuration.
    pub fn new(config: LlmBackendConfig, timeout: Duration) -> Result<Self, Report<LlmError>> {
        config.require_api_key()?;
        Ok(Self {
            config,
            http: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl SingleShotApi for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn generate(&self, prompt: &str) -> Result<String, Report<LlmError>> {
        let key = self.config.require_api_key()?;
        let path = format!("v1beta/models/{}:generateContent", self.config.model);
        let builder = self
            .http
            .post(self.config.endpoint(&path))
            .header("x-goog-api-key", key)
            .json(&json!({ "contents": [{ "parts": [{ "text": prompt }] }] }));

        let response: GenerateResponse = send_json(LlmProvider::Gemini, builder).await?;
        response.text().ok_or_else(|| {
            LlmError::EmptyOutput {
                provider: LlmProvider::Gemini.as_str().to_string(),
            }
            .into()
        })
    }
}
