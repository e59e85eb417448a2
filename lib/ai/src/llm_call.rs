//! LLM Call primitive.
//!
//! Single-shot inference with optional structured output, issued against the
//! Responses API. Summarization, graph extraction and retrieval condensing
//! are all built on this primitive.

use crate::backend::{MessageRole, TokenUsage};
use crate::error::LlmError;
use crate::openai::{ResponsesApi, ResponsesRequest};
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Instant;

/// A named JSON schema for structured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Schema name reported to the API.
    pub name: String,
    /// The JSON schema itself.
    pub schema: JsonValue,
}

/// Configuration for an LLM Call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallConfig {
    /// The prompt.
    pub prompt: String,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Optional output schema for structured output.
    pub output_schema: Option<OutputSchema>,
    /// Temperature for sampling.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl LlmCallConfig {
    /// Creates a new LLM call configuration.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            output_schema: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// The result of an LLM Call.
#[derive(Debug, Clone)]
pub struct LlmCallResult {
    /// The raw text output.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

impl LlmCallResult {
    /// Decodes the text output as structured JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, Report<LlmError>> {
        serde_json::from_str(&self.content).map_err(|e| {
            LlmError::ResponseParseFailed {
                provider: "openai".to_string(),
                reason: format!("structured output did not match schema: {e}"),
            }
            .into()
        })
    }
}

/// An LLM Call executor.
#[derive(Debug, Clone)]
pub struct LlmCall {
    config: LlmCallConfig,
    context: Option<JsonValue>,
}

impl LlmCall {
    /// Creates a new LLM Call with the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            config: LlmCallConfig::new(prompt),
            context: None,
        }
    }

    /// Creates an LLM Call from a configuration.
    #[must_use]
    pub fn from_config(config: LlmCallConfig) -> Self {
        Self {
            config,
            context: None,
        }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.config.system_prompt = Some(system.into());
        self
    }

    /// Adds an output schema for structured output.
    #[must_use]
    pub fn with_output_schema(mut self, name: impl Into<String>, schema: JsonValue) -> Self {
        self.config.output_schema = Some(OutputSchema {
            name: name.into(),
            schema,
        });
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    /// Sets the maximum output tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    /// Adds context data to be included in the prompt.
    #[must_use]
    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    /// Builds a Responses API request from this configuration.
    #[must_use]
    pub fn build_request(&self, model: &str) -> ResponsesRequest {
        let mut prompt = self.config.prompt.clone();

        if let Some(ref context) = self.context {
            let rendered = match context {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            prompt = format!("Context:\n{rendered}\n\n{prompt}");
        }

        let mut request = ResponsesRequest::new(model);
        request.push_message(MessageRole::User, prompt);
        request.instructions = self.config.system_prompt.clone();
        request.temperature = self.config.temperature;
        request.max_output_tokens = self.config.max_tokens;

        if let Some(ref schema) = self.config.output_schema {
            request = request.with_json_schema(&schema.name, schema.schema.clone());
        }

        request
    }

    /// Runs the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or produces no text.
    pub async fn run(&self, api: &dyn ResponsesApi) -> Result<LlmCallResult, Report<LlmError>> {
        let request = self.build_request(api.model());
        let started = Instant::now();
        let response = api.create(&request).await?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let content = response.final_text().ok_or_else(|| LlmError::EmptyOutput {
            provider: "openai".to_string(),
        })?;

        Ok(LlmCallResult {
            content,
            usage: response.token_usage(),
            latency_ms,
        })
    }
}
