//! Consulting a third model.

use super::object_schema;
use crate::error::ToolError;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry, arg_str};
use async_trait::async_trait;
use colloquy_ai::SingleShotApi;
use colloquy_core::Side;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{info, warn};

pub(super) fn register(registry: &mut ToolRegistry, gemini: Option<Arc<dyn SingleShotApi>>) {
    registry.register(
        ToolDefinition::new(
            "ask_gemini",
            "Ask Gemini, a third AI model outside this conversation, a question. It sees only \
             your prompt, not the conversation.",
        )
        .with_parameters(object_schema(
            json!({ "prompt": { "type": "string" } }),
            &["prompt"],
        )),
        Arc::new(AskGemini { client: gemini }),
    );
}

fn framed(side: Side, prompt: &str) -> String {
    format!(
        "You are being consulted by {}, an AI model taking part in a conversation with \
         another AI model. Answer the question below directly and concisely.\n\n{prompt}",
        side.display_name()
    )
}

struct AskGemini {
    client: Option<Arc<dyn SingleShotApi>>,
}

#[async_trait]
impl ToolHandler for AskGemini {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let Some(client) = &self.client else {
            return Ok(json!({ "response": null, "error": "Gemini is not configured" }));
        };
        let prompt = arg_str(&args, "prompt").unwrap_or_default();
        if prompt.trim().is_empty() {
            return Ok(json!({ "response": null, "error": "missing argument: prompt" }));
        }

        Ok(match client.generate(&framed(ctx.side, prompt)).await {
            Ok(response) => {
                info!(side = %ctx.side, chars = response.len(), "gemini answered");
                json!({ "response": response, "error": null })
            }
            Err(e) => {
                warn!(side = %ctx.side, error = %e, "gemini consultation failed");
                json!({ "response": null, "error": e.to_string() })
            }
        })
    }
}
