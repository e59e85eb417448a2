//! The two conversation participants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// One of the two participants in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The participant backed by the OpenAI Responses API.
    OpenAi,
    /// The participant backed by the Anthropic Messages API.
    Anthropic,
}

impl Side {
    /// Both sides, in a fixed order.
    pub const ALL: [Side; 2] = [Side::OpenAi, Side::Anthropic];

    /// Returns the opposite side.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::OpenAi => Self::Anthropic,
            Self::Anthropic => Self::OpenAi,
        }
    }

    /// Returns the name used for this side in logs and transcripts.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }

    /// Returns the serialized tag of this side.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Resolves a side from either its tag or its display name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|side| side.as_str() == name || side.display_name() == name)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A value held once for each side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerSide<T> {
    /// Value for [`Side::OpenAi`].
    pub openai: T,
    /// Value for [`Side::Anthropic`].
    pub anthropic: T,
}

impl<T> PerSide<T> {
    /// Creates a pair from explicit values.
    pub const fn new(openai: T, anthropic: T) -> Self {
        Self { openai, anthropic }
    }

    /// Iterates over `(side, value)` pairs in [`Side::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Side, &T)> {
        [(Side::OpenAi, &self.openai), (Side::Anthropic, &self.anthropic)].into_iter()
    }
}

impl<T> Index<Side> for PerSide<T> {
    type Output = T;

    fn index(&self, side: Side) -> &T {
        match side {
            Side::OpenAi => &self.openai,
            Side::Anthropic => &self.anthropic,
        }
    }
}

impl<T> IndexMut<Side> for PerSide<T> {
    fn index_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::OpenAi => &mut self.openai,
            Side::Anthropic => &mut self.anthropic,
        }
    }
}
