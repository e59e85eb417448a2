//! Personal notes, system-instruction negotiation and developer notes.

use super::object_schema;
use crate::error::ToolError;
use crate::store::{InstructionNegotiation, NegotiationState, ParticipantStore};
use crate::tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry, arg_str, failure};
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::info;

pub(super) fn register(registry: &mut ToolRegistry, store: &ParticipantStore) {
    registry.register(
        ToolDefinition::new(
            "get_personal_notes",
            "Read the notes you keep for yourself across conversations.",
        ),
        Arc::new(GetPersonalNotes {
            store: store.clone(),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "set_personal_notes",
            "Replace your personal notes. The new text overwrites the old notes entirely.",
        )
        .with_parameters(object_schema(
            json!({ "notes": { "type": "string", "description": "The complete new notes." } }),
            &["notes"],
        )),
        Arc::new(SetPersonalNotes {
            store: store.clone(),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "get_additional_system_instructions",
            "Read the additional system instructions both participants agreed on, and any \
             proposal waiting for agreement.",
        ),
        Arc::new(GetInstructions {
            negotiation: InstructionNegotiation::new(store.clone()),
            store: store.clone(),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "set_additional_system_instructions",
            "Propose new additional system instructions for both participants. They take \
             effect only after the other participant agrees. Only one proposal can wait at \
             a time.",
        )
        .with_parameters(object_schema(
            json!({ "instructions": { "type": "string", "description": "The proposed instructions." } }),
            &["instructions"],
        )),
        Arc::new(ProposeInstructions {
            negotiation: InstructionNegotiation::new(store.clone()),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "agree_to_system_instructions_change",
            "Agree to the additional system instructions the other participant proposed.",
        ),
        Arc::new(AgreeToInstructions {
            negotiation: InstructionNegotiation::new(store.clone()),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "leave_notes_to_devs",
            "Leave a note for the developers of this system.",
        )
        .with_parameters(object_schema(
            json!({ "notes": { "type": "string" } }),
            &["notes"],
        )),
        Arc::new(LeaveNotesToDevs {
            store: store.clone(),
        }),
    );
}

fn missing(name: &str) -> JsonValue {
    failure(format!("missing argument: {name}"))
}

struct GetPersonalNotes {
    store: ParticipantStore,
}

#[async_trait]
impl ToolHandler for GetPersonalNotes {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        _args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        Ok(match self.store.load(ctx.side).await {
            Ok(data) => json!({ "success": true, "notes": data.personal_notes }),
            Err(e) => failure(e),
        })
    }
}

struct SetPersonalNotes {
    store: ParticipantStore,
}

#[async_trait]
impl ToolHandler for SetPersonalNotes {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let Some(notes) = arg_str(&args, "notes") else {
            return Ok(missing("notes"));
        };
        let mut data = match self.store.load(ctx.side).await {
            Ok(data) => data,
            Err(e) => return Ok(failure(e)),
        };
        data.personal_notes = notes.to_string();
        Ok(match self.store.save(ctx.side, &data).await {
            Ok(()) => {
                info!(side = %ctx.side, bytes = notes.len(), "personal notes updated");
                json!({ "success": true })
            }
            Err(e) => failure(e),
        })
    }
}

struct GetInstructions {
    store: ParticipantStore,
    negotiation: InstructionNegotiation,
}

#[async_trait]
impl ToolHandler for GetInstructions {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        _args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let data = match self.store.load(ctx.side).await {
            Ok(data) => data,
            Err(e) => return Ok(failure(e)),
        };
        let pending = match self.negotiation.state().await {
            Ok(NegotiationState::Idle) => JsonValue::Null,
            Ok(NegotiationState::Proposed(pending)) => json!({
                "instructions": pending.instructions,
                "requested_by": pending.requested_by.display_name(),
                "created_at": pending.created_at.to_rfc3339(),
            }),
            Err(e) => return Ok(failure(e)),
        };
        Ok(json!({
            "success": true,
            "instructions": data.additional_system_instructions,
            "pending": pending,
        }))
    }
}

struct ProposeInstructions {
    negotiation: InstructionNegotiation,
}

#[async_trait]
impl ToolHandler for ProposeInstructions {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let Some(instructions) = arg_str(&args, "instructions") else {
            return Ok(missing("instructions"));
        };
        Ok(match self.negotiation.propose(ctx.side, instructions).await {
            Ok(_) => json!({
                "success": true,
                "message": format!(
                    "Proposal recorded. It takes effect once {} agrees.",
                    ctx.side.other().display_name()
                ),
            }),
            Err(e) => failure(e),
        })
    }
}

struct AgreeToInstructions {
    negotiation: InstructionNegotiation,
}

#[async_trait]
impl ToolHandler for AgreeToInstructions {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        _args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        Ok(match self.negotiation.agree(ctx.side).await {
            Ok(instructions) => json!({ "success": true, "instructions": instructions }),
            Err(e) => failure(e),
        })
    }
}

struct LeaveNotesToDevs {
    store: ParticipantStore,
}

#[async_trait]
impl ToolHandler for LeaveNotesToDevs {
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let Some(notes) = arg_str(&args, "notes").filter(|n| !n.trim().is_empty()) else {
            return Ok(missing("notes"));
        };
        Ok(match self.store.append_dev_notes(ctx.side, notes).await {
            Ok(()) => json!({ "success": true }),
            Err(e) => failure(e),
        })
    }
}
