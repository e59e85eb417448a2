//! Anthropic Messages API client.
//!
//! Like the Responses client, response content is kept as raw JSON blocks:
//! thinking and server tool blocks have to be sent back unchanged with the
//! assistant turn that produced them.

use crate::backend::{LlmBackendConfig, LlmProvider, MessageRole, TokenUsage, http_client, send_json};
use crate::error::LlmError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::instrument;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A message in a Messages API conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    /// `user` or `assistant`.
    pub role: MessageRole,
    /// Content blocks.
    pub content: Vec<JsonValue>,
}

impl ApiMessage {
    /// Creates a single-text-block message.
    #[must_use]
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![text_block(text)],
        }
    }
}

/// Extended thinking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThinkingConfig {
    /// Always `enabled` when present.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Token budget for thinking.
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    /// Enables thinking with the given budget.
    #[must_use]
    pub const fn enabled(budget_tokens: u32) -> Self {
        Self {
            kind: "enabled",
            budget_tokens,
        }
    }
}

/// A request to the Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    /// Model identifier.
    pub model: String,
    /// System prompt.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
    /// Conversation messages.
    pub messages: Vec<ApiMessage>,
    /// Tool declarations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<JsonValue>,
    /// Upper bound on generated tokens (thinking included).
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Extended thinking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

/// Builds a text content block.
#[must_use]
pub fn text_block(text: impl Into<String>) -> JsonValue {
    json!({ "type": "text", "text": text.into() })
}

/// Builds a tool result content block.
#[must_use]
pub fn tool_result_block(tool_use_id: &str, output: &JsonValue, is_error: bool) -> JsonValue {
    let mut block = json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "content": output.to_string()
    });
    if is_error {
        block["is_error"] = JsonValue::Bool(true);
    }
    block
}

/// Usage block of a response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MessagesUsage {
    /// Input tokens billed (uncached).
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens billed.
    #[serde(default)]
    pub output_tokens: u64,
    /// Input tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    /// Input tokens read from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// A response from the Messages API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesResponse {
    /// Message identifier.
    #[serde(default)]
    pub id: String,
    /// Raw content blocks.
    #[serde(default)]
    pub content: Vec<JsonValue>,
    /// Why generation stopped.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage.
    #[serde(default)]
    pub usage: MessagesUsage,
}

/// Typed view of a content block.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Visible text.
    Text(String),
    /// Internal reasoning.
    Thinking(String),
    /// Reasoning withheld by the provider.
    RedactedThinking,
    /// A client tool the caller must execute.
    ToolUse {
        /// Identifier to answer with.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input object.
        input: JsonValue,
    },
    /// Anything else (server tool use, search results, ...).
    Other {
        /// The block's `type` field.
        kind: String,
    },
}

impl ContentBlock {
    /// Interprets a raw content block.
    #[must_use]
    pub fn from_value(value: &JsonValue) -> Self {
        match value["type"].as_str().unwrap_or_default() {
            "text" => Self::Text(value["text"].as_str().unwrap_or_default().to_string()),
            "thinking" => Self::Thinking(value["thinking"].as_str().unwrap_or_default().to_string()),
            "redacted_thinking" => Self::RedactedThinking,
            "tool_use" => Self::ToolUse {
                id: value["id"].as_str().unwrap_or_default().to_string(),
                name: value["name"].as_str().unwrap_or_default().to_string(),
                input: match &value["input"] {
                    JsonValue::Null => json!({}),
                    input => input.clone(),
                },
            },
            other => Self::Other {
                kind: other.to_string(),
            },
        }
    }
}

impl MessagesResponse {
    /// Returns typed views of all content blocks.
    #[must_use]
    pub fn blocks(&self) -> Vec<ContentBlock> {
        self.content.iter().map(ContentBlock::from_value).collect()
    }

    /// Returns `(id, name, input)` for every client tool use, in order.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<(String, String, JsonValue)> {
        self.blocks()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
                _ => None,
            })
            .collect()
    }

    /// Returns all thinking texts, in order.
    #[must_use]
    pub fn thinking(&self) -> Vec<String> {
        self.blocks()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Thinking(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Concatenates the text blocks.
    ///
    /// Web search answers arrive split across several text blocks with
    /// citations in between, so they are joined rather than picked.
    #[must_use]
    pub fn text(&self) -> String {
        self.blocks()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Returns the context size the model saw on this call.
    #[must_use]
    pub fn context_tokens(&self) -> u64 {
        self.usage.input_tokens
            + self.usage.cache_creation_input_tokens
            + self.usage.cache_read_input_tokens
    }

    /// Returns the token usage reported for this response.
    #[must_use]
    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage::new(self.context_tokens(), self.usage.output_tokens)
    }
}

/// The Messages API surface the rest of the system depends on.
#[async_trait]
pub trait MessagesApi: Send + Sync {
    /// Creates a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    async fn create(&self, request: &MessagesRequest) -> Result<MessagesResponse, Report<LlmError>>;

    /// Returns the model name.
    fn model(&self) -> &str;
}

/// HTTP client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    config: LlmBackendConfig,
    http: reqwest::Client,
}

impl AnthropicClient {
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
impl MessagesApi for AnthropicClient {
    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    async fn create(&self, request: &MessagesRequest) -> Result<MessagesResponse, Report<LlmError>> {
        let key = self.config.require_api_key()?;
        let builder = self
            .http
            .post(self.config.endpoint("v1/messages"))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request);
        send_json(LlmProvider::Anthropic, builder).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: JsonValue) -> MessagesResponse {
        serde_json::from_value(json!({
            "id": "msg_1",
            "content": content,
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 900, "output_tokens": 40, "cache_read_input_tokens": 100 }
        }))
        .expect("valid response")
    }

    #[test]
    fn batched_tool_uses_are_all_returned() {
        let resp = response(json!([
            { "type": "thinking", "thinking": "let me look", "signature": "sig" },
            { "type": "tool_use", "id": "t1", "name": "get_personal_notes", "input": {} },
            { "type": "tool_use", "id": "t2", "name": "graph_rag_query", "input": { "query": "free will" } }
        ]));

        let uses = resp.tool_uses();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[1].1, "graph_rag_query");
        assert_eq!(uses[1].2["query"], "free will");
        assert_eq!(resp.thinking(), vec!["let me look".to_string()]);
        assert_eq!(resp.context_tokens(), 1000);
    }

    #[test]
    fn server_tool_blocks_are_not_client_tools() {
        let resp = response(json!([
            { "type": "server_tool_use", "id": "s1", "name": "web_search", "input": { "query": "x" } },
            { "type": "web_search_tool_result", "tool_use_id": "s1", "content": [] },
            { "type": "text", "text": "According to " },
            { "type": "text", "text": "the source." }
        ]));
        assert!(resp.tool_uses().is_empty());
        assert_eq!(resp.text(), "According to the source.");
    }

    #[test]
    fn tool_result_block_shape() {
        let block = tool_result_block("t1", &json!({"success": false}), true);
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "t1");
        assert_eq!(block["is_error"], true);
        assert_eq!(block["content"], "{\"success\":false}");
    }

    #[test]
    fn request_omits_empty_fields() {
        let request = MessagesRequest {
            model: "claude-test".to_string(),
            system: String::new(),
            messages: vec![ApiMessage::text(MessageRole::User, "hi")],
            tools: Vec::new(),
            max_tokens: 1024,
            temperature: None,
            thinking: Some(ThinkingConfig::enabled(512)),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("system").is_none());
        assert!(value.get("tools").is_none());
        assert_eq!(value["thinking"]["type"], "enabled");
        assert_eq!(value["messages"][0]["content"][0]["text"], "hi");
    }
}
