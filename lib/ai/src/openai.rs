//! OpenAI Responses API client.
//!
//! Output items are kept as raw JSON so that function calls (and any
//! reasoning items that accompany them) can be echoed back verbatim on the
//! follow-up request; [`OutputItem`] is a typed view over them.

use crate::backend::{LlmBackendConfig, LlmProvider, MessageRole, TokenUsage, http_client, send_json};
use crate::error::LlmError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{instrument, warn};

/// A request to the Responses API.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    /// Model identifier.
    pub model: String,
    /// System-level instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Input items (messages, function calls, function call outputs).
    pub input: Vec<JsonValue>,
    /// Tool declarations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<JsonValue>,
    /// Tool choice policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Upper bound on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Text output configuration (structured output format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<JsonValue>,
}

impl ResponsesRequest {
    /// Creates a request with no input.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input: Vec::new(),
            tools: Vec::new(),
            tool_choice: None,
            max_output_tokens: None,
            temperature: None,
            text: None,
        }
    }

    /// Sets the instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Appends a plain message input item.
    pub fn push_message(&mut self, role: MessageRole, text: impl Into<String>) {
        self.input.push(message_item(role, text));
    }

    /// Requests JSON output conforming to a schema.
    #[must_use]
    pub fn with_json_schema(mut self, name: &str, schema: JsonValue) -> Self {
        self.text = Some(json!({
            "format": {
                "type": "json_schema",
                "name": name,
                "schema": schema,
                "strict": true
            }
        }));
        self
    }
}

/// Builds a message input item.
#[must_use]
pub fn message_item(role: MessageRole, text: impl Into<String>) -> JsonValue {
    json!({ "role": role, "content": text.into() })
}

/// Builds a function call output input item.
#[must_use]
pub fn function_call_output(call_id: &str, output: &JsonValue) -> JsonValue {
    json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": output.to_string()
    })
}

/// Usage block of a response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ResponsesUsage {
    /// Input tokens billed.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens billed.
    #[serde(default)]
    pub output_tokens: u64,
}

/// A response from the Responses API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesResponse {
    /// Response identifier.
    #[serde(default)]
    pub id: String,
    /// Raw output items.
    #[serde(default)]
    pub output: Vec<JsonValue>,
    /// Token usage, when reported.
    #[serde(default)]
    pub usage: Option<ResponsesUsage>,
}

/// Typed view of one output item.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    /// An assistant message.
    Message {
        /// `output_text` contents in order.
        texts: Vec<String>,
        /// `refusal` contents in order.
        refusals: Vec<String>,
    },
    /// A function call the caller must execute.
    FunctionCall(FunctionCall),
    /// Anything else (reasoning, web search calls, ...).
    Other {
        /// The item's `type` field.
        kind: String,
    },
}

impl OutputItem {
    /// Interprets a raw output item.
    #[must_use]
    pub fn from_value(value: &JsonValue) -> Self {
        let kind = value["type"].as_str().unwrap_or_default();
        match kind {
            "message" => {
                let mut texts = Vec::new();
                let mut refusals = Vec::new();
                for part in value["content"].as_array().into_iter().flatten() {
                    match part["type"].as_str() {
                        Some("output_text") => {
                            texts.push(part["text"].as_str().unwrap_or_default().to_string());
                        }
                        Some("refusal") => {
                            refusals.push(part["refusal"].as_str().unwrap_or_default().to_string());
                        }
                        _ => {}
                    }
                }
                Self::Message { texts, refusals }
            }
            "function_call" => Self::FunctionCall(FunctionCall {
                call_id: value["call_id"].as_str().unwrap_or_default().to_string(),
                name: value["name"].as_str().unwrap_or_default().to_string(),
                arguments: value["arguments"].clone(),
            }),
            other => Self::Other {
                kind: other.to_string(),
            },
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// Identifier to answer with.
    pub call_id: String,
    /// Function name.
    pub name: String,
    /// Raw arguments, usually a JSON-encoded string.
    pub arguments: JsonValue,
}

impl FunctionCall {
    /// Decodes the arguments into an object.
    ///
    /// Arguments normally arrive JSON-encoded inside a string, but objects are
    /// accepted as-is and undecodable text degrades to an empty object.
    #[must_use]
    pub fn parsed_arguments(&self) -> JsonValue {
        match &self.arguments {
            JsonValue::Object(_) => self.arguments.clone(),
            JsonValue::String(raw) if raw.trim().is_empty() => json!({}),
            JsonValue::String(raw) => match serde_json::from_str::<JsonValue>(raw) {
                Ok(value @ JsonValue::Object(_)) => value,
                Ok(_) | Err(_) => {
                    warn!(tool = %self.name, "function call arguments are not a JSON object");
                    json!({})
                }
            },
            _ => json!({}),
        }
    }
}

impl ResponsesResponse {
    /// Returns typed views of all output items.
    #[must_use]
    pub fn items(&self) -> Vec<OutputItem> {
        self.output.iter().map(OutputItem::from_value).collect()
    }

    /// Returns the function calls in output order.
    #[must_use]
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.items()
            .into_iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Returns the last text of the last message item that has any text.
    #[must_use]
    pub fn final_text(&self) -> Option<String> {
        self.items().into_iter().rev().find_map(|item| match item {
            OutputItem::Message { mut texts, .. } => texts.pop(),
            _ => None,
        })
    }

    /// Returns the first refusal, if the model refused.
    #[must_use]
    pub fn refusal(&self) -> Option<String> {
        self.items().into_iter().find_map(|item| match item {
            OutputItem::Message { mut refusals, .. } if !refusals.is_empty() => {
                Some(refusals.remove(0))
            }
            _ => None,
        })
    }

    /// Returns the token usage reported for this response.
    #[must_use]
    pub fn token_usage(&self) -> TokenUsage {
        self.usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default()
    }
}

/// The Responses API surface the rest of the system depends on.
#[async_trait]
pub trait ResponsesApi: Send + Sync {
    /// Creates a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    async fn create(&self, request: &ResponsesRequest) -> Result<ResponsesResponse, Report<LlmError>>;

    /// Returns the model name.
    fn model(&self) -> &str;
}

/// HTTP client for the OpenAI Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: LlmBackendConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
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
impl ResponsesApi for OpenAiClient {
    #[instrument(skip_all, fields(model = %request.model, items = request.input.len()))]
    async fn create(&self, request: &ResponsesRequest) -> Result<ResponsesResponse, Report<LlmError>> {
        let key = self.config.require_api_key()?;
        let builder = self
            .http
            .post(self.config.endpoint("responses"))
            .bearer_auth(key)
            .json(request);
        send_json(LlmProvider::OpenAi, builder).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
