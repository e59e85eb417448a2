//! Message types for conversations.

use colloquy_core::Side;
use serde::{Deserialize, Serialize};

/// How an empty utterance is shown to models and readers.
pub const SILENCE_MARKER: &str = "(silence)";

/// One utterance in the shared history.
///
/// Empty content is a legal utterance: the side chose to stay silent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who spoke.
    pub speaker: Side,
    /// What was said.
    pub content: String,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub fn new(speaker: Side, content: impl Into<String>) -> Self {
        Self {
            speaker,
            content: content.into(),
        }
    }

    /// Returns true for an intentionally empty utterance.
    #[must_use]
    pub fn is_silence(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Returns the content as sent to a model or summarizer.
    #[must_use]
    pub fn wire_text(&self) -> &str {
        if self.is_silence() {
            SILENCE_MARKER
        } else {
            &self.content
        }
    }
}

/// Renders a history as `Speaker: text` lines.
#[must_use]
pub fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.speaker.display_name(), m.wire_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_a_wire_marker() {
        let msg = Message::new(Side::Anthropic, "  ");
        assert!(msg.is_silence());
        assert_eq!(msg.wire_text(), SILENCE_MARKER);
        assert_eq!(msg.content, "  ");
    }

    #[test]
    fn transcript_names_speakers() {
        let history = vec![
            Message::new(Side::OpenAi, "Hello."),
            Message::new(Side::Anthropic, ""),
        ];
        assert_eq!(transcript(&history), "OpenAI: Hello.\n\nAnthropic: (silence)");
    }

    #[test]
    fn message_serde_roundtrip() {
        let msg = Message::new(Side::OpenAi, "hi");
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["speaker"], "openai");
        let parsed: Message = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, msg);
    }
}
