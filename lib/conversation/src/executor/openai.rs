//! OpenAI side: Responses API with function calls.

use super::{
    TurnContext, TurnExecutor, TurnOutcome, TurnSettings, dispatch_logged, raise_hush, role_for,
};
use crate::error::TurnError;
use crate::message::Message;
use crate::prompt::{
    CLOSING_TURN_PROMPT, FOLLOW_UP_PROMPT, HUSH_PROMPT, SystemPrompts, TERMINATE_ADD_PROMPT,
};
use crate::tool::ToolRegistry;
use async_trait::async_trait;
use colloquy_ai::openai::function_call_output;
use colloquy_ai::{
    HeuristicEstimator, MessageRole, ResponsesApi, ResponsesRequest, ResponsesResponse,
    TokenEstimator,
};
use colloquy_core::Side;
use rootcause::prelude::Report;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const SIDE: Side = Side::OpenAi;

/// Turn executor over the OpenAI Responses API.
pub struct OpenAiExecutor {
    api: Arc<dyn ResponsesApi>,
    tools: Arc<ToolRegistry>,
    prompts: SystemPrompts,
    estimator: Arc<dyn TokenEstimator>,
    settings: TurnSettings,
}

impl OpenAiExecutor {
    /// Creates an executor with the heuristic token estimator.
    #[must_use]
    pub fn new(
        api: Arc<dyn ResponsesApi>,
        tools: Arc<ToolRegistry>,
        prompts: SystemPrompts,
        settings: TurnSettings,
    ) -> Self {
        Self {
            api,
            tools,
            prompts,
            estimator: Arc::new(HeuristicEstimator),
            settings,
        }
    }

    /// Replaces the token estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    fn initial_request(
        &self,
        system: &str,
        history: &[Message],
        ctx: &TurnContext<'_>,
    ) -> ResponsesRequest {
        let mut request = ResponsesRequest::new(self.api.model()).with_instructions(system);
        for message in history {
            request.push_message(role_for(SIDE, message.speaker), message.wire_text());
        }
        if ctx.state.termination_accepted {
            request.push_message(MessageRole::Developer, CLOSING_TURN_PROMPT);
        } else if ctx.state.hush {
            request.push_message(MessageRole::Developer, HUSH_PROMPT);
        }
        request.tools = self.tools.to_openai_tools();
        request.tools.push(json!({ "type": "web_search_preview" }));
        request.tool_choice = Some("auto".to_string());
        request.max_output_tokens = Some(self.settings.max_output_tokens);
        request.temperature = self.settings.temperature;
        request
    }

    fn estimate(&self, system: &str, history: &[Message]) -> u64 {
        self.estimator.estimate(system)
            + history
                .iter()
                .map(|m| self.estimator.estimate(m.wire_text()))
                .sum::<u64>()
    }
}

/// The utterance of a final response. A refusal without text ends the dialog.
fn utterance(response: &ResponsesResponse, ctx: &mut TurnContext<'_>) -> String {
    if let Some(text) = response.final_text() {
        return text;
    }
    if let Some(refusal) = response.refusal() {
        warn!(side = %SIDE, %refusal, "model refused, ending the dialog");
        ctx.state.termination_accepted = true;
    }
    String::new()
}

#[async_trait]
impl TurnExecutor for OpenAiExecutor {
    fn side(&self) -> Side {
        SIDE
    }

    #[instrument(skip_all, fields(side = %SIDE, history = history.len()))]
    async fn produce_next_message(
        &self,
        history: &[Message],
        ctx: &mut TurnContext<'_>,
    ) -> Result<TurnOutcome, Report<TurnError>> {
        if ctx.state.aborted {
            return Ok(TurnOutcome::Aborted);
        }
        let system = self.prompts.build(SIDE).await;
        if ctx.state.aborted {
            return Ok(TurnOutcome::Aborted);
        }
        ctx.state.system_prompts[SIDE] = system.clone();

        let estimate = self.estimate(&system, history);
        ctx.state.approx_tokens[SIDE] = estimate;
        if self.settings.exceeds_threshold(estimate) {
            raise_hush(SIDE, estimate, ctx).await;
        }
        let mut request = self.initial_request(&system, history, ctx);

        let mut round = 0;
        loop {
            // Once termination is accepted the model only gets to wrap up.
            let terminating = ctx.state.termination_accepted;
            if terminating {
                request.tool_choice = Some("none".to_string());
            }

            let response = self.api.create(&request).await.map_err(|e| TurnError::Vendor {
                side: SIDE,
                reason: e.to_string(),
            })?;
            if ctx.state.aborted {
                return Ok(TurnOutcome::Aborted);
            }
            ctx.state.add_usage(SIDE, response.token_usage());
            if response.output.is_empty() {
                return Err(TurnError::EmptyOutput { side: SIDE }.into());
            }

            let calls = response.function_calls();
            if calls.is_empty() || terminating || round >= self.settings.max_tool_rounds {
                if !calls.is_empty() {
                    debug!(calls = calls.len(), "ignoring tool calls at the end of the turn");
                }
                let text = utterance(&response, ctx);
                return Ok(TurnOutcome::Spoke(Message::new(SIDE, text)));
            }

            request.input.extend(response.output.iter().cloned());
            for call in calls {
                let args = call.parsed_arguments();
                let Some(result) =
                    dispatch_logged(&self.tools, SIDE, ctx, &call.name, args).await?
                else {
                    return Ok(TurnOutcome::Aborted);
                };
                request.input.push(function_call_output(&call.call_id, &result));
            }
            let follow_up = if ctx.state.termination_accepted {
                TERMINATE_ADD_PROMPT
            } else {
                FOLLOW_UP_PROMPT
            };
            request.push_message(MessageRole::Developer, follow_up);
            round += 1;
        }
    }
}
