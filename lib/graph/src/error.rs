//! Error types for the graph crate.

use std::fmt;

/// Errors from knowledge graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The database could not be reached.
    ConnectionFailed { reason: String },
    /// The database rejected a statement.
    QueryFailed { code: String, message: String },
    /// The database answered with something we could not read.
    InvalidResponse { reason: String },
    /// Invalid connection configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "graph database connection failed: {reason}")
            }
            Self::QueryFailed { code, message } => {
                write!(f, "graph query failed ({code}): {message}")
            }
            Self::InvalidResponse { reason } => {
                write!(f, "invalid graph database response: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid graph database configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for GraphError {}
