//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `LlmError`: Low-level vendor API operations
//! - `PromptError`: Prompt template operations

use std::fmt;

/// Errors from vendor LLM API operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Request could not be sent.
    RequestFailed { provider: String, reason: String },
    /// The API answered with a non-success status.
    ApiStatus {
        provider: String,
        status: u16,
        body: String,
    },
    /// Response parsing failed.
    ResponseParseFailed { provider: String, reason: String },
    /// The response carried no usable output at all.
    EmptyOutput { provider: String },
    /// Timeout waiting for response.
    Timeout { provider: String },
    /// Rate limit exceeded.
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed { provider, reason } => {
                write!(f, "{provider} request failed: {reason}")
            }
            Self::ApiStatus {
                provider,
                status,
                body,
            } => {
                write!(f, "{provider} API returned {status}: {body}")
            }
            Self::ResponseParseFailed { provider, reason } => {
                write!(f, "failed to parse {provider} response: {reason}")
            }
            Self::EmptyOutput { provider } => {
                write!(f, "{provider} response contained no output")
            }
            Self::Timeout { provider } => write!(f, "{provider} request timed out"),
            Self::RateLimited {
                provider,
                retry_after_secs,
            } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "{provider} rate limited, retry after {secs}s")
                } else {
                    write!(f, "{provider} rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors from prompt operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// Missing required variable.
    MissingVariable { template: String, variable: String },
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVariable { template, variable } => {
                write!(
                    f,
                    "missing required variable '{variable}' in template '{template}'"
                )
            }
        }
    }
}

impl std::error::Error for PromptError {}
