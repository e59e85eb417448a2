//! Dialog orchestration for colloquy.
//!
//! This crate runs one conversation between the two participants:
//!
//! - **Dialog**: the turn-taking state machine and its finish sequence
//! - **Executors**: one per vendor, each running its tool-calling loop
//! - **Tools**: the registry offered to both sides
//! - **Participant Store**: notes and negotiated system instructions
//! - **Log**: the append-only JSONL record of a run
//! - **Postprocessing**: summary and knowledge graph extraction
//! - **Rendering**: the HTML transcript

pub mod dialog;
pub mod error;
pub mod executor;
pub mod log;
pub mod message;
pub mod postprocess;
pub mod prompt;
pub mod render;
pub mod state;
pub mod store;
pub mod tool;
pub mod tools;

pub use dialog::{Dialog, DialogConfig, DialogOutcome, DialogPhase, FinishReason};
pub use error::{
    DialogError, LogError, NegotiationError, PostprocessError, RenderError, StoreError, ToolError,
    TurnError,
};
pub use executor::{
    AnthropicExecutor, OpenAiExecutor, TurnContext, TurnExecutor, TurnOutcome, TurnSettings,
};
pub use log::{LogRecord, LogWriter, list_runs, read_log};
pub use message::{Message, SILENCE_MARKER};
pub use postprocess::{ConversationSummary, KeyClaim, OpenAiPostprocessor, Postprocessor};
pub use prompt::SystemPrompts;
pub use render::{HtmlRenderer, TranscriptRenderer};
pub use state::RunState;
pub use store::{InstructionNegotiation, NegotiationState, ParticipantData, ParticipantStore};
pub use tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry};
pub use tools::{ToolServices, build_registry};
