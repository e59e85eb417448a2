//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: participant and pending-change files
//! - `NegotiationError`: rejected system-instruction transitions
//! - `LogError`: the conversation log
//! - `ToolError`: tool lookup and execution
//! - `TurnError`: one side's turn
//! - `PostprocessError`: summary, graph extraction and condensation
//! - `RenderError`: transcript rendering
//! - `DialogError`: setting up or running a dialog

use colloquy_core::Side;
use std::fmt;

/// Errors from the participant key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Reading a file failed.
    ReadFailed { path: String, reason: String },
    /// Writing a file failed.
    WriteFailed { path: String, reason: String },
    /// A file held something that is not a valid record.
    Corrupt { path: String, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed { path, reason } => write!(f, "failed to read {path}: {reason}"),
            Self::WriteFailed { path, reason } => write!(f, "failed to write {path}: {reason}"),
            Self::Corrupt { path, reason } => write!(f, "corrupt record in {path}: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Rejected system-instruction negotiation steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// A proposal is already waiting for agreement.
    AlreadyPending { requested_by: Side },
    /// There is nothing to agree to.
    NothingPending,
    /// The proposer cannot agree to its own proposal.
    OwnProposal { side: Side },
    /// The backing store failed.
    Storage { reason: String },
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPending { requested_by } => write!(
                f,
                "a change proposed by {requested_by} is already waiting for agreement"
            ),
            Self::NothingPending => write!(f, "there is no pending change to agree to"),
            Self::OwnProposal { side } => {
                write!(f, "{side} proposed this change and cannot agree to it")
            }
            Self::Storage { reason } => write!(f, "instruction storage failed: {reason}"),
        }
    }
}

impl std::error::Error for NegotiationError {}

/// Errors from the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log no longer accepts records.
    Sealed { path: String },
    /// Appending failed.
    WriteFailed { path: String, reason: String },
    /// Reading failed.
    ReadFailed { path: String, reason: String },
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sealed { path } => write!(f, "log {path} is sealed"),
            Self::WriteFailed { path, reason } => {
                write!(f, "failed to append to log {path}: {reason}")
            }
            Self::ReadFailed { path, reason } => write!(f, "failed to read log {path}: {reason}"),
        }
    }
}

impl std::error::Error for LogError {}

/// Errors from tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Tool not found.
    NotFound { name: String },
    /// Tool execution failed.
    ExecutionFailed { name: String, reason: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "tool not found: {name}"),
            Self::ExecutionFailed { name, reason } => {
                write!(f, "tool '{name}' execution failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors that end one side's turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// The vendor call failed.
    Vendor { side: Side, reason: String },
    /// The vendor answered with no output at all.
    EmptyOutput { side: Side },
    /// A tool call could not be served.
    Tool { side: Side, reason: String },
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vendor { side, reason } => write!(f, "{side} vendor call failed: {reason}"),
            Self::EmptyOutput { side } => write!(f, "{side} produced no output"),
            Self::Tool { side, reason } => write!(f, "{side} tool call failed: {reason}"),
        }
    }
}

impl std::error::Error for TurnError {}

/// Errors from postprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostprocessError {
    /// Summarization failed.
    Summary { reason: String },
    /// Graph extraction failed.
    Extraction { reason: String },
    /// Writing the graph failed.
    GraphWrite { reason: String },
    /// Condensing retrieval context failed.
    Condense { reason: String },
}

impl fmt::Display for PostprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Summary { reason } => write!(f, "summarization failed: {reason}"),
            Self::Extraction { reason } => write!(f, "graph extraction failed: {reason}"),
            Self::GraphWrite { reason } => write!(f, "graph write failed: {reason}"),
            Self::Condense { reason } => write!(f, "context condensation failed: {reason}"),
        }
    }
}

impl std::error::Error for PostprocessError {}

/// Errors from transcript rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The transcript could not be produced.
    Failed { path: String, reason: String },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { path, reason } => write!(f, "failed to render {path}: {reason}"),
        }
    }
}

impl std::error::Error for RenderError {}

/// Errors that stop a dialog from running at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// The dialog was already run.
    AlreadyStarted,
    /// No randomness was available to pick the starting side.
    Randomness { reason: String },
    /// The log could not be written.
    Log { reason: String },
}

impl fmt::Display for DialogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "dialog was already started"),
            Self::Randomness { reason } => write!(f, "failed to pick a starting side: {reason}"),
            Self::Log { reason } => write!(f, "dialog log failed: {reason}"),
        }
    }
}

impl std::error::Error for DialogError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_error_display() {
        let err = NegotiationError::AlreadyPending {
            requested_by: Side::Anthropic,
        };
        assert!(err.to_string().contains("Anthropic"));
    }

    #[test]
    fn tool_error_display() {
        let err = ToolError::NotFound {
            name: "make_coffee".to_string(),
        };
        assert!(err.to_string().contains("make_coffee"));
    }

    #[test]
    fn turn_error_display() {
        let err = TurnError::Vendor {
            side: Side::OpenAi,
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("OpenAI"));
        assert!(err.to_string().contains("timeout"));
    }
}
