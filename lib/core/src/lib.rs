//! Core domain types and utilities for colloquy.
//!
//! This crate provides the foundational types shared by every other crate:
//! the two conversation sides, per-side value pairs, run identifiers and the
//! rootcause-based `Result` alias.

pub mod error;
pub mod id;
pub mod side;

pub use error::Result;
pub use id::{ParseIdError, RunId};
pub use side::{PerSide, Side};
