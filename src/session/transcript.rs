use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One completed turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Which side spoke this turn
    pub speaker: Speaker,

    /// Full text of the turn
    pub text: String,

    /// When the turn completed
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: String) -> Self {
        Self {
            speaker,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// Accumulates transcription deltas into whole turns.
///
/// The live service streams small text fragments for both directions while
/// a turn is in progress. Fragments are concatenated verbatim, and on turn
/// completion each side's buffer becomes one entry: the user's speech
/// first, then the reply. Sides that produced only whitespace are dropped.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    user: String,
    assistant: String,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of the user's speech transcription
    pub fn push_user(&mut self, fragment: &str) {
        self.user.push_str(fragment);
    }

    /// Append a fragment of the reply transcription
    pub fn push_assistant(&mut self, fragment: &str) {
        self.assistant.push_str(fragment);
    }

    /// True when neither side has accumulated text this turn
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.assistant.is_empty()
    }

    /// Complete the current turn: emit entries for both sides and reset.
    ///
    /// Returns zero, one or two entries in speaking order.
    pub fn flush(&mut self) -> Vec<TranscriptEntry> {
        let user = std::mem::take(&mut self.user);
        let assistant = std::mem::take(&mut self.assistant);

        let mut entries = Vec::new();
        let user = user.trim();
        if !user.is_empty() {
            entries.push(TranscriptEntry::new(Speaker::User, user.to_string()));
        }
        let assistant = assistant.trim();
        if !assistant.is_empty() {
            entries.push(TranscriptEntry::new(Speaker::Assistant, assistant.to_string()));
        }
        entries
    }
}
