//! Startup errors.

use std::fmt;

/// Errors that keep a run from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { reason: String },
    /// A vendor or graph client could not be built.
    Client { name: &'static str, reason: String },
    /// The dialog could not be created or started.
    Dialog { reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Client { name, reason } => write!(f, "failed to build {name} client: {reason}"),
            Self::Dialog { reason } => write!(f, "dialog failed: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}
