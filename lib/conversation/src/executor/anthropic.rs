//! Anthropic side: Messages API with tool use and extended thinking.

use super::{
    CONVERSATION_START, TurnContext, TurnExecutor, TurnOutcome, TurnSettings, dispatch_logged,
    raise_hush, role_for,
};
use crate::error::TurnError;
use crate::log::thinking_name;
use crate::message::Message;
use crate::prompt::{
    CLOSING_TURN_PROMPT, FOLLOW_UP_PROMPT, HUSH_PROMPT, SystemPrompts, TERMINATE_ADD_PROMPT,
};
use crate::tool::ToolRegistry;
use async_trait::async_trait;
use colloquy_ai::anthropic::{ApiMessage, ThinkingConfig, text_block, tool_result_block};
use colloquy_ai::{MessageRole, MessagesApi, MessagesRequest};
use colloquy_core::Side;
use rootcause::prelude::Report;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};

const SIDE: Side = Side::Anthropic;

const PAUSE_TURN: &str = "pause_turn";

/// Turn executor over the Anthropic Messages API.
pub struct AnthropicExecutor {
    api: Arc<dyn MessagesApi>,
    tools: Arc<ToolRegistry>,
    prompts: SystemPrompts,
    settings: TurnSettings,
    thinking_budget: Option<u32>,
    max_web_searches: u32,
}

impl AnthropicExecutor {
    /// Creates an executor without extended thinking.
    #[must_use]
    pub fn new(
        api: Arc<dyn MessagesApi>,
        tools: Arc<ToolRegistry>,
        prompts: SystemPrompts,
        settings: TurnSettings,
    ) -> Self {
        Self {
            api,
            tools,
            prompts,
            settings,
            thinking_budget: None,
            max_web_searches: 3,
        }
    }

    /// Enables extended thinking with a token budget.
    #[must_use]
    pub fn with_thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    fn initial_request(
        &self,
        system: &str,
        history: &[Message],
        ctx: &TurnContext<'_>,
    ) -> MessagesRequest {
        let mut system = system.to_string();
        if ctx.state.termination_accepted {
            system.push_str("\n\n");
            system.push_str(CLOSING_TURN_PROMPT);
        } else if ctx.state.hush {
            system.push_str("\n\n");
            system.push_str(HUSH_PROMPT);
        }
        let mut tools = self.tools.to_anthropic_tools();
        tools.push(json!({
            "type": "web_search_20250305",
            "name": "web_search",
            "max_uses": self.max_web_searches,
        }));
        let thinking = self.thinking_budget.map(ThinkingConfig::enabled);
        MessagesRequest {
            model: self.api.model().to_string(),
            system,
            messages: build_messages(history),
            tools,
            max_tokens: self.settings.max_output_tokens,
            // Extended thinking only runs at the default temperature.
            temperature: if thinking.is_some() {
                None
            } else {
                self.settings.temperature
            },
            thinking,
        }
    }
}

/// Translates the history into alternating messages that start with `user`.
pub(crate) fn build_messages(history: &[Message]) -> Vec<ApiMessage> {
    let mut messages: Vec<ApiMessage> = Vec::new();
    for message in history {
        let role = role_for(SIDE, message.speaker);
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.push(text_block(message.wire_text())),
            _ => messages.push(ApiMessage::text(role, message.wire_text())),
        }
    }
    if messages.first().is_none_or(|m| m.role != MessageRole::User) {
        messages.insert(0, ApiMessage::text(MessageRole::User, CONVERSATION_START));
    }
    messages
}

#[async_trait]
impl TurnExecutor for AnthropicExecutor {
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

        // The context size is the one reported for the previous call.
        let previous = ctx.state.approx_tokens[SIDE];
        if self.settings.exceeds_threshold(previous) {
            raise_hush(SIDE, previous, ctx).await;
        }
        let mut request = self.initial_request(&system, history, ctx);

        let mut round = 0;
        loop {
            let terminating = ctx.state.termination_accepted;
            let response = self.api.create(&request).await.map_err(|e| TurnError::Vendor {
                side: SIDE,
                reason: e.to_string(),
            })?;
            if ctx.state.aborted {
                return Ok(TurnOutcome::Aborted);
            }
            ctx.state.add_usage(SIDE, response.token_usage());
            ctx.state.approx_tokens[SIDE] = response.context_tokens();
            if response.content.is_empty() {
                return Err(TurnError::EmptyOutput { side: SIDE }.into());
            }
            for thought in response.thinking() {
                ctx.log.record(&thinking_name(SIDE), &thought).await;
            }

            // A paused server tool resumes when its content is sent back as is.
            if response.stop_reason.as_deref() == Some(PAUSE_TURN)
                && round < self.settings.max_tool_rounds
            {
                debug!(round, "server tool paused the turn, resuming");
                request.messages.push(ApiMessage {
                    role: MessageRole::Assistant,
                    content: response.content.clone(),
                });
                round += 1;
                continue;
            }

            let uses = response.tool_uses();
            if uses.is_empty() || terminating || round >= self.settings.max_tool_rounds {
                if !uses.is_empty() {
                    debug!(uses = uses.len(), "ignoring tool uses at the end of the turn");
                }
                return Ok(TurnOutcome::Spoke(Message::new(SIDE, response.text())));
            }

            request.messages.push(ApiMessage {
                role: MessageRole::Assistant,
                content: response.content.clone(),
            });
            let mut results = Vec::with_capacity(uses.len() + 1);
            for (id, name, input) in uses {
                let Some(result) = dispatch_logged(&self.tools, SIDE, ctx, &name, input).await?
                else {
                    return Ok(TurnOutcome::Aborted);
                };
                results.push(tool_result_block(&id, &result, false));
            }
            results.push(text_block(if ctx.state.termination_accepted {
                TERMINATE_ADD_PROMPT
            } else {
                FOLLOW_UP_PROMPT
            }));
            request.messages.push(ApiMessage {
                role: MessageRole::User,
                content: results,
            });
            round += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::Harness;
    use colloquy_ai::{LlmError, MessagesResponse};
    use serde_json::Value as JsonValue;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<JsonValue>>,
        requests: Mutex<Vec<MessagesRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<JsonValue>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<MessagesRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl MessagesApi for Scripted {
        async fn create(
            &self,
            request: &MessagesRequest,
        ) -> Result<MessagesResponse, Report<LlmError>> {
            self.requests.lock().expect("lock").push(request.clone());
            match self.replies.lock().expect("lock").pop() {
                Some(reply) => Ok(serde_json::from_value(reply).expect("response")),
                None => Err(LlmError::Timeout {
                    provider: "anthropic".to_string(),
                }
                .into()),
            }
        }

        fn model(&self) -> &str {
            "claude-test"
        }
    }

    fn reply(content: JsonValue, input_tokens: u64) -> JsonValue {
        json!({
            "content": content,
            "stop_reason": "end_turn",
            "usage": { "input_tokens": input_tokens, "output_tokens": 20 }
        })
    }

    fn executor(api: Arc<Scripted>, harness: &Harness, ceiling: u64) -> AnthropicExecutor {
        AnthropicExecutor::new(
            api,
            harness.tools.clone(),
            harness.prompts.clone(),
            TurnSettings::new(ceiling, 2048).with_temperature(0.7),
        )
    }

    #[test]
    fn history_is_merged_and_starts_with_user() {
        let messages = build_messages(&[
            Message::new(Side::Anthropic, "Hello."),
            Message::new(Side::OpenAi, "Hi."),
            Message::new(Side::OpenAi, ""),
            Message::new(Side::Anthropic, "Well."),
        ]);
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
                MessageRole::Assistant
            ]
        );
        assert_eq!(messages[0].content[0]["text"], CONVERSATION_START);
        assert_eq!(messages[2].content.len(), 2);
        assert_eq!(messages[2].content[1]["text"], "(silence)");

        let plain = build_messages(&[Message::new(Side::OpenAi, "Hello.")]);
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn batched_tool_uses_are_answered_together() {
        let mut harness = Harness::new();
        let api = Scripted::new(vec![
            reply(
                json!([
                    { "type": "thinking", "thinking": "Let me check my notes.", "signature": "sig" },
                    { "type": "tool_use", "id": "tu_1", "name": "get_personal_notes", "input": {} },
                    { "type": "tool_use", "id": "tu_2", "name": "set_personal_notes", "input": { "notes": "tea" } }
                ]),
                500,
            ),
            reply(
                json!([
                    { "type": "text", "text": "I noted " },
                    { "type": "text", "text": "that." }
                ]),
                700,
            ),
        ]);
        let executor = executor(api.clone(), &harness, 1_000_000).with_thinking(1024);
        let history = vec![Message::new(Side::OpenAi, "Do you like tea?")];

        let outcome = executor
            .produce_next_message(&history, &mut harness.ctx())
            .await
            .expect("turn");
        assert_eq!(
            outcome,
            TurnOutcome::Spoke(Message::new(Side::Anthropic, "I noted that."))
        );
        assert_eq!(harness.state.approx_tokens[SIDE], 700);
        assert_eq!(harness.state.api_usage[SIDE].input_tokens, 1200);

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].temperature.is_none());
        assert!(requests[0].tools.iter().any(|t| t["type"] == "web_search_20250305"));
        let second = &requests[1];
        let assistant = &second.messages[second.messages.len() - 2];
        assert_eq!(assistant.role, MessageRole::Assistant);
        assert_eq!(assistant.content[0]["type"], "thinking");
        let results = &second.messages[second.messages.len() - 1];
        assert_eq!(results.role, MessageRole::User);
        assert_eq!(results.content.len(), 3);
        assert_eq!(results.content[0]["tool_use_id"], "tu_1");
        assert_eq!(results.content[1]["tool_use_id"], "tu_2");
        assert_eq!(results.content[2]["text"], FOLLOW_UP_PROMPT);

        assert_eq!(
            harness.log_names().await,
            vec![
                "Anthropic (thinking)",
                "Anthropic (tool call)",
                "Anthropic (tool result)",
                "Anthropic (tool call)",
                "Anthropic (tool result)",
            ]
        );
    }

    #[tokio::test]
    async fn previous_context_size_raises_hush() {
        let mut harness = Harness::new();
        let api = Scripted::new(vec![
            reply(json!([{ "type": "text", "text": "First." }]), 900),
            reply(json!([{ "type": "text", "text": "Second." }]), 950),
        ]);
        let executor = executor(api.clone(), &harness, 1000);
        let history = vec![Message::new(Side::OpenAi, "Go on.")];

        executor
            .produce_next_message(&history, &mut harness.ctx())
            .await
            .expect("turn");
        assert!(!harness.state.hush);
        executor
            .produce_next_message(&history, &mut harness.ctx())
            .await
            .expect("turn");
        assert!(harness.state.hush);
        let requests = api.requests();
        assert!(!requests[0].system.contains(HUSH_PROMPT));
        assert!(requests[1].system.ends_with(HUSH_PROMPT));
        assert_eq!(requests[1].temperature, Some(0.7));
    }

    #[tokio::test]
    async fn terminate_then_wrap_up_ignores_further_tools() {
        let mut harness = Harness::new();
        let api = Scripted::new(vec![
            reply(
                json!([{ "type": "tool_use", "id": "tu_1", "name": "terminate_dialog", "input": {} }]),
                100,
            ),
            reply(
                json!([
                    { "type": "text", "text": "Thank you." },
                    { "type": "tool_use", "id": "tu_2", "name": "sleep", "input": { "seconds": 1 } }
                ]),
                120,
            ),
        ]);
        let executor = executor(api.clone(), &harness, 1_000_000);
        let outcome = executor
            .produce_next_message(&[Message::new(Side::OpenAi, "Bye?")], &mut harness.ctx())
            .await
            .expect("turn");
        assert_eq!(
            outcome,
            TurnOutcome::Spoke(Message::new(Side::Anthropic, "Thank you."))
        );
        assert!(harness.state.termination_accepted);
        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().expect("message");
        assert_eq!(last.content.last().expect("block")["text"], TERMINATE_ADD_PROMPT);
        assert_eq!(harness.log_names().await.len(), 2);
    }

    #[tokio::test]
    async fn paused_turn_is_resumed() {
        let mut harness = Harness::new();
        let api = Scripted::new(vec![
            json!({
                "content": [
                    { "type": "text", "text": "Let me look that up." },
                    { "type": "server_tool_use", "id": "srv_1", "name": "web_search", "input": { "query": "tea" } }
                ],
                "stop_reason": "pause_turn",
                "usage": { "input_tokens": 300, "output_tokens": 10 }
            }),
            reply(json!([{ "type": "text", "text": "Green tea came first." }]), 400),
        ]);
        let executor = executor(api.clone(), &harness, 1_000_000);
        let outcome = executor
            .produce_next_message(&[Message::new(Side::OpenAi, "Which tea is oldest?")], &mut harness.ctx())
            .await
            .expect("turn");
        assert_eq!(
            outcome,
            TurnOutcome::Spoke(Message::new(Side::Anthropic, "Green tea came first."))
        );

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        let resumed = requests[1].messages.last().expect("message");
        assert_eq!(resumed.role, MessageRole::Assistant);
        assert_eq!(resumed.content[1]["type"], "server_tool_use");
        assert_eq!(harness.state.api_usage[SIDE].input_tokens, 700);
        assert!(harness.log_names().await.is_empty());
    }

    #[tokio::test]
    async fn closing_turn_after_the_other_side_ended() {
        let mut harness = Harness::new();
        harness.state.termination_accepted = true;
        let api = Scripted::new(vec![reply(
            json!([
                { "type": "text", "text": "Goodbye, it was a pleasure." },
                { "type": "tool_use", "id": "tu_1", "name": "set_personal_notes", "input": { "notes": "x" } }
            ]),
            100,
        )]);
        let executor = executor(api.clone(), &harness, 1_000_000);
        let outcome = executor
            .produce_next_message(&[Message::new(Side::OpenAi, "Thank you.")], &mut harness.ctx())
            .await
            .expect("turn");
        assert_eq!(
            outcome,
            TurnOutcome::Spoke(Message::new(Side::Anthropic, "Goodbye, it was a pleasure."))
        );
        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system.ends_with(CLOSING_TURN_PROMPT));
        assert!(harness.log_names().await.is_empty());
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let mut harness = Harness::new();
        let api = Scripted::new(vec![reply(json!([]), 10)]);
        let executor = executor(api, &harness, 1_000_000);
        let result = executor
            .produce_next_message(&[Message::new(Side::OpenAi, "Hello.")], &mut harness.ctx())
            .await;
        assert!(result.is_err());
    }
}
