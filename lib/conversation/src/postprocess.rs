//! Postprocessing: summary, graph extraction and retrieval condensation.
//!
//! All three are single structured calls against the summarization vendor.

use crate::error::PostprocessError;
use crate::message::{Message, transcript};
use async_trait::async_trait;
use colloquy_ai::{LlmCall, ResponsesApi};
use colloquy_graph::ConversationGraph;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{info, instrument};

/// A claim attributed to a speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyClaim {
    /// Display name of the speaker.
    pub speaker: String,
    /// The claim.
    pub text: String,
}

/// Structured summary of a finished conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Topics discussed.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Summary in Japanese.
    #[serde(default)]
    pub japanese_summary: String,
    /// Summary in English, when produced.
    #[serde(default)]
    pub english_summary: Option<String>,
    /// Main claims.
    #[serde(default)]
    pub key_claims: Vec<KeyClaim>,
    /// Open questions.
    #[serde(default)]
    pub questions: Vec<String>,
    /// Points of agreement.
    #[serde(default)]
    pub agreements: Vec<String>,
    /// Points of disagreement.
    #[serde(default)]
    pub disagreements: Vec<String>,
}

/// The summarization vendor as the dialog uses it.
#[async_trait]
pub trait Postprocessor: Send + Sync {
    /// Summarizes a full history.
    async fn summarize(
        &self,
        messages: &[Message],
    ) -> Result<ConversationSummary, Report<PostprocessError>>;

    /// Extracts a graph from a summary.
    async fn extract_graph(
        &self,
        summary: &ConversationSummary,
    ) -> Result<ConversationGraph, Report<PostprocessError>>;

    /// Condenses retrieved graph context for a query. Empty output is an
    /// error so callers fall back to the raw context.
    async fn condense(&self, query: &str, context: &str) -> Result<String, Report<PostprocessError>>;
}

fn string_array() -> JsonValue {
    json!({ "type": "array", "items": { "type": "string" } })
}

/// JSON schema of [`ConversationSummary`].
#[must_use]
pub fn summary_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "topics": string_array(),
            "japanese_summary": { "type": "string" },
            "english_summary": { "type": ["string", "null"] },
            "key_claims": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "speaker": { "type": "string" },
                        "text": { "type": "string" }
                    },
                    "required": ["speaker", "text"],
                    "additionalProperties": false
                }
            },
            "questions": string_array(),
            "agreements": string_array(),
            "disagreements": string_array()
        },
        "required": [
            "title", "topics", "japanese_summary", "english_summary",
            "key_claims", "questions", "agreements", "disagreements"
        ],
        "additionalProperties": false
    })
}

/// JSON schema of [`ConversationGraph`] as extraction produces it.
#[must_use]
pub fn graph_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "nodes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "type": {
                            "type": "string",
                            "enum": ["concept", "claim", "question", "example", "counterexample"]
                        },
                        "text": { "type": "string" },
                        "speaker": { "type": ["string", "null"] }
                    },
                    "required": ["id", "type", "text", "speaker"],
                    "additionalProperties": false
                }
            },
            "edges": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source": { "type": "string" },
                        "target": { "type": "string" },
                        "type": {
                            "type": "string",
                            "enum": ["supports", "contradicts", "elaborates", "responds_to", "refers_to"]
                        }
                    },
                    "required": ["source", "target", "type"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["nodes", "edges"],
        "additionalProperties": false
    })
}

const SUMMARY_SYSTEM: &str = "You summarize conversations between two AI models. \
Be faithful to what was said; do not add opinions. Write japanese_summary in Japanese and \
english_summary in English. Turns shown as (silence) were intentionally left empty.";

const GRAPH_SYSTEM: &str = "You turn a conversation summary into a small knowledge graph. \
Nodes are concepts, claims, questions, examples and counterexamples, with short ids such as \
n1, n2. Edges connect node ids with one of: supports, contradicts, elaborates, responds_to, \
refers_to. Attribute claims to their speaker when known.";

const CONDENSE_SYSTEM: &str = "You condense knowledge graph listings. Keep node ids, keep \
only what is relevant to the query, and answer in plain text.";

/// [`Postprocessor`] backed by the OpenAI Responses API.
#[derive(Clone)]
pub struct OpenAiPostprocessor {
    api: Arc<dyn ResponsesApi>,
    max_output_tokens: u32,
}

impl OpenAiPostprocessor {
    /// Creates a postprocessor.
    #[must_use]
    pub fn new(api: Arc<dyn ResponsesApi>, max_output_tokens: u32) -> Self {
        Self {
            api,
            max_output_tokens,
        }
    }
}

#[async_trait]
impl Postprocessor for OpenAiPostprocessor {
    #[instrument(skip_all, fields(messages = messages.len()))]
    async fn summarize(
        &self,
        messages: &[Message],
    ) -> Result<ConversationSummary, Report<PostprocessError>> {
        let failed = |e: String| PostprocessError::Summary { reason: e };
        let result = LlmCall::new("Summarize the conversation above.")
            .with_system_prompt(SUMMARY_SYSTEM)
            .with_context(JsonValue::String(transcript(messages)))
            .with_output_schema("conversation_summary", summary_schema())
            .with_max_tokens(self.max_output_tokens)
            .run(self.api.as_ref())
            .await
            .map_err(|e| failed(e.to_string()))?;
        let summary: ConversationSummary = result.parse().map_err(|e| failed(e.to_string()))?;
        info!(title = %summary.title, latency_ms = result.latency_ms, "conversation summarized");
        Ok(summary)
    }

    #[instrument(skip_all)]
    async fn extract_graph(
        &self,
        summary: &ConversationSummary,
    ) -> Result<ConversationGraph, Report<PostprocessError>> {
        let failed = |e: String| PostprocessError::Extraction { reason: e };
        let context = serde_json::to_value(summary).map_err(|e| failed(e.to_string()))?;
        let result = LlmCall::new("Extract the knowledge graph of the summary above.")
            .with_system_prompt(GRAPH_SYSTEM)
            .with_context(context)
            .with_output_schema("conversation_graph", graph_schema())
            .with_max_tokens(self.max_output_tokens)
            .run(self.api.as_ref())
            .await
            .map_err(|e| failed(e.to_string()))?;
        let graph: ConversationGraph = result.parse().map_err(|e| failed(e.to_string()))?;
        info!(nodes = graph.nodes.len(), edges = graph.edges.len(), "graph extracted");
        Ok(graph)
    }

    #[instrument(skip_all)]
    async fn condense(&self, query: &str, context: &str) -> Result<String, Report<PostprocessError>> {
        let failed = |e: String| PostprocessError::Condense { reason: e };
        let result = LlmCall::new(format!(
            "Query: {query}\n\nCondense the knowledge graph listing above for this query."
        ))
        .with_system_prompt(CONDENSE_SYSTEM)
        .with_context(JsonValue::String(context.to_string()))
        .with_max_tokens(self.max_output_tokens)
        .run(self.api.as_ref())
        .await
        .map_err(|e| failed(e.to_string()))?;

        let text = result.content.trim();
        if text.is_empty() {
            return Err(failed("empty output".to_string()).into());
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_ai::{LlmError, ResponsesRequest, ResponsesResponse};
    use colloquy_core::Side;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        requests: Mutex<Vec<ResponsesRequest>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResponsesApi for Scripted {
        async fn create(
            &self,
            request: &ResponsesRequest,
        ) -> Result<ResponsesResponse, Report<LlmError>> {
            self.requests.lock().expect("lock").push(request.clone());
            let text = self.replies.lock().expect("lock").pop().unwrap_or_default();
            Ok(serde_json::from_value(json!({
                "output": [{ "type": "message", "content": [{ "type": "output_text", "text": text }] }]
            }))
            .expect("response"))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn summary_uses_strict_schema_and_silence_marker() {
        let reply = json!({
            "title": "Free will",
            "topics": ["free will"],
            "japanese_summary": "自由意志について",
            "english_summary": null,
            "key_claims": [{ "speaker": "OpenAI", "text": "Choices are caused" }],
            "questions": [],
            "agreements": [],
            "disagreements": []
        })
        .to_string();
        let api = Arc::new(Scripted::new(&[&reply]));
        let post = OpenAiPostprocessor::new(api.clone(), 2048);

        let summary = post
            .summarize(&[
                Message::new(Side::OpenAi, "Is free will real?"),
                Message::new(Side::Anthropic, ""),
            ])
            .await
            .expect("summary");
        assert_eq!(summary.title, "Free will");
        assert_eq!(summary.english_summary, None);

        let requests = api.requests.lock().expect("lock");
        let request = &requests[0];
        assert_eq!(request.text.as_ref().expect("format")["format"]["strict"], true);
        let prompt = request.input[0]["content"].as_str().expect("prompt");
        assert!(prompt.contains("Anthropic: (silence)"));
    }

    #[tokio::test]
    async fn malformed_summary_is_an_error() {
        let api = Arc::new(Scripted::new(&["not json"]));
        let post = OpenAiPostprocessor::new(api, 2048);
        assert!(post.summarize(&[]).await.is_err());
    }

    #[tokio::test]
    async fn empty_condensation_is_an_error() {
        let api = Arc::new(Scripted::new(&["  ", "short answer"]));
        let post = OpenAiPostprocessor::new(api, 512);
        assert!(post.condense("q", "Nodes:\n").await.is_err());
        assert_eq!(
            post.condense("q", "Nodes:\n").await.expect("condense"),
            "short answer"
        );
    }

    #[test]
    fn schemas_are_strict_compatible() {
        let summary = summary_schema();
        let properties = summary["properties"].as_object().expect("properties");
        let required = summary["required"].as_array().expect("required");
        assert_eq!(properties.len(), required.len());
        assert_eq!(graph_schema()["additionalProperties"], false);
    }
}
