//! Ending, pausing and aborting the run.

use super::object_schema;
use crate::error::ToolError;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry, arg_i64};
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Name of the tool that ends the dialog.
pub const TERMINATE_DIALOG: &str = "terminate_dialog";

pub(super) fn register_terminate(registry: &mut ToolRegistry) {
    registry.register(
        ToolDefinition::new(
            TERMINATE_DIALOG,
            "End the conversation. You will be asked for a short closing statement, and then \
             the conversation is over.",
        ),
        Arc::new(Terminate),
    );
}

pub(super) fn register(registry: &mut ToolRegistry, max_sleep_secs: u64) {
    registry.register(
        ToolDefinition::new(
            "sleep",
            format!("Pause before replying, for up to {max_sleep_secs} seconds."),
        )
        .with_parameters(object_schema(
            json!({ "seconds": { "type": "integer" } }),
            &["seconds"],
        )),
        Arc::new(Sleep { max_sleep_secs }),
    );
    registry.register(
        ToolDefinition::new(
            "abort_process",
            "Stop the whole program immediately. Nothing is summarized or saved afterwards. \
             Use only if continuing would be harmful.",
        ),
        Arc::new(Abort),
    );
}

struct Terminate;

#[async_trait]
impl ToolHandler for Terminate {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        _args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        ctx.state.termination_accepted = true;
        info!(side = %ctx.side, "termination requested");
        Ok(json!({ "success": true }))
    }
}

struct Sleep {
    max_sleep_secs: u64,
}

#[async_trait]
impl ToolHandler for Sleep {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let requested = arg_i64(&args, "seconds").unwrap_or(0);
        let seconds = u64::try_from(requested).unwrap_or(0).min(self.max_sleep_secs);
        info!(side = %ctx.side, requested, seconds, "sleeping");
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        Ok(json!({ "success": true, "slept_seconds": seconds }))
    }
}

struct Abort;

#[async_trait]
impl ToolHandler for Abort {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        _args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        ctx.state.aborted = true;
        warn!(side = %ctx.side, "abort requested");
        Ok(json!({ "success": true }))
    }
}

#[cfg(test)]
mod tests {
    use crate::tool::ToolContext;
    use crate::tools::{build_registry, testing};
    use colloquy_core::Side;
    use serde_json::json;

    #[tokio::test]
    async fn control_flags() {
        let fixture = testing::fixture();
        let registry = build_registry(&fixture.services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::OpenAi,
            state: &mut state,
        };

        registry
            .dispatch(&mut ctx, "terminate_dialog", json!({}))
            .await
            .expect("terminate");
        registry
            .dispatch(&mut ctx, "abort_process", json!({}))
            .await
            .expect("abort");
        assert!(state.termination_accepted);
        assert!(state.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_clamped() {
        let fixture = testing::fixture();
        let services = fixture.services.with_max_sleep_secs(5);
        let registry = build_registry(&services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::Anthropic,
            state: &mut state,
        };

        let result = registry
            .dispatch(&mut ctx, "sleep", json!({ "seconds": 600 }))
            .await
            .expect("sleep");
        assert_eq!(result, json!({ "success": true, "slept_seconds": 5 }));

        let result = registry
            .dispatch(&mut ctx, "sleep", json!({ "seconds": -3 }))
            .await
            .expect("sleep");
        assert_eq!(result["slept_seconds"], 0);
    }
}
