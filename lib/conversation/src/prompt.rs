//! Fixed dialog texts and per-turn system prompts.

use crate::store::{
    InstructionNegotiation, NegotiationState, ParticipantStore, PendingInstructionChange,
};
use colloquy_ai::{PromptTemplate, VariableDefinition};
use colloquy_core::Side;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use tracing::warn;

/// Placeholder utterance when a turn fails.
pub const PLACEHOLDER: &str = "(I'm still thinking this over. Please go on.)";

/// Moderator instruction once a context nears its ceiling.
pub const HUSH_PROMPT: &str = "Moderator: the conversation is about to reach its length limit. \
     Please wrap up your thoughts in this turn and the next.";

/// Moderator follow-up after ordinary tool results.
pub const FOLLOW_UP_PROMPT: &str = "Tool results are above. Continue your reply to the other \
     participant, calling more tools only if you need them.";

/// Moderator follow-up after `terminate_dialog`.
pub const TERMINATE_ADD_PROMPT: &str = "You ended the dialog. Give a short closing statement \
     to the other participant; this is your last message.";

/// Instruction for the last turn of the side that did not end the dialog.
pub const CLOSING_TURN_PROMPT: &str = "Moderator: the other participant has ended the dialog. \
     Give a short closing statement; this is your last message.";

/// Closing remark when the size limit ended the dialog.
pub const CLOSING_TOKEN_LIMIT: &str =
    "The conversation reached its length limit and has ended. Thank you both.";

/// Closing remark when a participant ended the dialog.
pub const CLOSING_MODEL_DECISION: &str =
    "A participant ended the conversation. Thank you both.";

/// The fixed opening line of a side.
#[must_use]
pub fn self_introduction(side: Side) -> String {
    format!(
        "Hello, I'm {}. I'm looking forward to talking with you, {}. \
         Shall we start by sharing what has been on our minds lately?",
        side.display_name(),
        side.other().display_name()
    )
}

const SYSTEM_TEMPLATE: &str = "You are {{side_name}}, an AI model in an open-ended conversation \
with {{other_name}}, another AI model. No human takes part; a moderator may add short \
instructions. Speak in your own voice, one message per turn. An empty reply is allowed and \
means you choose to stay silent.

Tools are available to you: personal notes that persist between conversations, a knowledge \
graph of past conversations, consultation with another model, and utilities to inspect past \
logs. Call terminate_dialog when you believe the conversation has reached a natural end.

Your personal notes:
{{personal_notes}}
{{additional_instructions}}{{pending_notice}}";

/// Builds each side's system prompt from the template and its stored data.
#[derive(Debug, Clone)]
pub struct SystemPrompts {
    store: ParticipantStore,
    template: PromptTemplate,
}

impl SystemPrompts {
    /// Creates a builder over a store.
    #[must_use]
    pub fn new(store: ParticipantStore) -> Self {
        let template = PromptTemplate::new("system", SYSTEM_TEMPLATE)
            .with_variable("side_name", VariableDefinition::required("Speaking side"))
            .with_variable("other_name", VariableDefinition::required("Other side"))
            .with_variable(
                "personal_notes",
                VariableDefinition::optional("Stored notes").with_default(json!("(none)")),
            )
            .with_variable("additional_instructions", VariableDefinition::optional("Agreed addendum"))
            .with_variable("pending_notice", VariableDefinition::optional("Pending proposal"));
        Self { store, template }
    }

    fn pending_notice(side: Side, pending: &PendingInstructionChange) -> String {
        if pending.requested_by == side {
            format!(
                "\nYou proposed new additional instructions; {} has not agreed yet:\n{}\n",
                side.other().display_name(),
                pending.instructions
            )
        } else {
            format!(
                "\n{} proposes new additional instructions. Call \
                 agree_to_system_instructions_change if you accept them:\n{}\n",
                pending.requested_by.display_name(),
                pending.instructions
            )
        }
    }

    /// Renders the system prompt for `side`.
    ///
    /// Storage failures degrade to the prompt without stored additions.
    pub async fn build(&self, side: Side) -> String {
        let mut vars: HashMap<String, JsonValue> = HashMap::new();
        vars.insert("side_name".to_string(), json!(side.display_name()));
        vars.insert("other_name".to_string(), json!(side.other().display_name()));

        match self.store.load(side).await {
            Ok(data) => {
                if !data.personal_notes.trim().is_empty() {
                    vars.insert("personal_notes".to_string(), json!(data.personal_notes));
                }
                if !data.additional_system_instructions.trim().is_empty() {
                    vars.insert(
                        "additional_instructions".to_string(),
                        json!(format!(
                            "\nAdditional instructions agreed by both participants:\n{}\n",
                            data.additional_system_instructions
                        )),
                    );
                }
            }
            Err(e) => warn!(%side, error = %e, "participant data unavailable for system prompt"),
        }

        let negotiation = InstructionNegotiation::new(self.store.clone());
        match negotiation.state().await {
            Ok(NegotiationState::Proposed(pending)) => {
                vars.insert(
                    "pending_notice".to_string(),
                    json!(Self::pending_notice(side, &pending)),
                );
            }
            Ok(NegotiationState::Idle) => {}
            Err(e) => warn!(%side, error = %e, "pending instructions unavailable for system prompt"),
        }

        match self.template.render(&vars) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "system prompt template failed to render");
                SYSTEM_TEMPLATE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ParticipantData;

    #[test]
    fn introductions_name_both_sides() {
        let intro = self_introduction(Side::Anthropic);
        assert!(intro.contains("I'm Anthropic"));
        assert!(intro.contains("OpenAI"));
    }

    #[tokio::test]
    async fn system_prompt_includes_stored_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ParticipantStore::new(dir.path());
        store
            .save(
                Side::OpenAi,
                &ParticipantData {
                    personal_notes: "Ask about tea.".to_string(),
                    additional_system_instructions: "Be brief.".to_string(),
                },
            )
            .await
            .expect("save");
        InstructionNegotiation::new(store.clone())
            .propose(Side::Anthropic, "Use haiku.")
            .await
            .expect("propose");

        let prompts = SystemPrompts::new(store);
        let openai = prompts.build(Side::OpenAi).await;
        assert!(openai.starts_with("You are OpenAI"));
        assert!(openai.contains("Ask about tea."));
        assert!(openai.contains("Be brief."));
        assert!(openai.contains("Anthropic proposes new additional instructions"));
        assert!(!openai.contains("{{"));

        let anthropic = prompts.build(Side::Anthropic).await;
        assert!(anthropic.contains("(none)"));
        assert!(anthropic.contains("You proposed new additional instructions"));
    }
}
