//! Turn executors.
//!
//! A turn executor produces one side's next utterance. Both vendors'
//! tool-calling protocols are normalized into the same loop: call the model,
//! dispatch every tool call it asked for, send the results back with a
//! moderator follow-up, and repeat until the model answers with text.

mod anthropic;
mod openai;

pub use anthropic::AnthropicExecutor;
pub use openai::OpenAiExecutor;

use crate::error::TurnError;
use crate::log::{LogWriter, names, tool_call_name, tool_result_name};
use crate::message::Message;
use crate::prompt::HUSH_PROMPT;
use crate::state::RunState;
use crate::tool::{ToolContext, ToolRegistry};
use async_trait::async_trait;
use colloquy_ai::MessageRole;
use colloquy_core::Side;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

/// What a turn needs besides the history.
pub struct TurnContext<'a> {
    /// The run state, lent for the duration of the turn.
    pub state: &'a mut RunState,
    /// The run's log.
    pub log: &'a LogWriter,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The side said something, possibly nothing.
    Spoke(Message),
    /// A tool aborted the run mid-turn.
    Aborted,
}

/// Produces one side's utterances.
#[async_trait]
pub trait TurnExecutor: Send + Sync {
    /// The side this executor speaks for.
    fn side(&self) -> Side;

    /// Produces the next utterance given the full history.
    ///
    /// # Errors
    ///
    /// Returns an error when the vendor fails, answers with no output, or
    /// asks for a tool that cannot be served.
    async fn produce_next_message(
        &self,
        history: &[Message],
        ctx: &mut TurnContext<'_>,
    ) -> Result<TurnOutcome, Report<TurnError>>;
}

/// Per-side generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnSettings {
    /// Context size at which the side is hushed, at 80%.
    pub token_ceiling: u64,
    /// Upper bound on generated tokens per call.
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Tool round trips allowed in one turn.
    pub max_tool_rounds: u32,
}

impl TurnSettings {
    /// Creates settings with default temperature and tool rounds.
    #[must_use]
    pub fn new(token_ceiling: u64, max_output_tokens: u32) -> Self {
        Self {
            token_ceiling,
            max_output_tokens,
            temperature: None,
            max_tool_rounds: 16,
        }
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the tool round limit.
    #[must_use]
    pub fn with_max_tool_rounds(mut self, max_tool_rounds: u32) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Returns true when `tokens` exceeds 80% of the ceiling.
    #[must_use]
    pub fn exceeds_threshold(&self, tokens: u64) -> bool {
        tokens.saturating_mul(10) > self.token_ceiling.saturating_mul(8)
    }
}

/// Text of the synthetic opening turn when a history starts with the
/// executor's own message.
pub(crate) const CONVERSATION_START: &str = "(The conversation begins.)";

/// Maps a speaker onto a vendor role from `own`'s point of view.
pub(crate) fn role_for(own: Side, speaker: Side) -> MessageRole {
    if speaker == own {
        MessageRole::Assistant
    } else {
        MessageRole::User
    }
}

/// Raises the hush flag once, announcing it in the log.
pub(crate) async fn raise_hush(side: Side, tokens: u64, ctx: &mut TurnContext<'_>) {
    if ctx.state.hush {
        return;
    }
    ctx.state.hush = true;
    info!(%side, tokens, "context near its ceiling, asking both sides to wrap up");
    ctx.log.record(names::MODERATOR, HUSH_PROMPT).await;
}

/// Runs one tool call, logging the call and its result as a pair.
///
/// Returns `None` when the tool aborted the run; nothing more is logged then.
pub(crate) async fn dispatch_logged(
    tools: &ToolRegistry,
    side: Side,
    ctx: &mut TurnContext<'_>,
    name: &str,
    args: JsonValue,
) -> Result<Option<JsonValue>, Report<TurnError>> {
    ctx.log
        .record_json(&tool_call_name(side), &json!({ "tool": name, "args": &args }))
        .await;

    let mut tool_ctx = ToolContext {
        side,
        state: &mut *ctx.state,
    };
    let result = match tools.dispatch(&mut tool_ctx, name, args).await {
        Ok(result) => result,
        Err(e) => {
            warn!(%side, tool = name, error = %e, "tool call failed");
            if !ctx.state.aborted {
                ctx.log
                    .record_json(
                        &tool_result_name(side),
                        &json!({ "tool": name, "error": e.to_string() }),
                    )
                    .await;
            }
            return Err(TurnError::Tool {
                side,
                reason: e.to_string(),
            }
            .into());
        }
    };
    if ctx.state.aborted {
        return Ok(None);
    }

    ctx.log
        .record_json(&tool_result_name(side), &json!({ "tool": name, "result": &result }))
        .await;
    Ok(Some(result))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_eighty_percent() {
        let settings = TurnSettings::new(1000, 100);
        assert!(!settings.exceeds_threshold(800));
        assert!(settings.exceeds_threshold(801));
    }

    #[test]
    fn roles_are_relative_to_the_executor() {
        assert_eq!(role_for(Side::OpenAi, Side::OpenAi), MessageRole::Assistant);
        assert_eq!(role_for(Side::OpenAi, Side::Anthropic), MessageRole::User);
        assert_eq!(role_for(Side::Anthropic, Side::OpenAi), MessageRole::User);
    }

    #[tokio::test]
    async fn unknown_tool_fails_and_pairs_the_log() {
        let mut harness = testing::Harness::new();
        let tools = harness.tools.clone();
        let mut ctx = harness.ctx();
        let result = dispatch_logged(&tools, Side::OpenAi, &mut ctx, "make_coffee", json!({})).await;
        assert!(result.is_err());
        assert_eq!(
            harness.log_names().await,
            vec!["OpenAI (tool call)", "OpenAI (tool result)"]
        );
    }

    #[tokio::test]
    async fn abort_suppresses_the_result_record() {
        let mut harness = testing::Harness::new();
        let tools = harness.tools.clone();
        let mut ctx = harness.ctx();
        let result = dispatch_logged(&tools, Side::Anthropic, &mut ctx, "abort_process", json!({}))
            .await
            .expect("dispatch");
        assert!(result.is_none());
        assert!(harness.state.aborted);
        assert_eq!(harness.log_names().await, vec!["Anthropic (tool call)"]);
    }
}
