use serde::{Deserialize, Serialize};

use crate::tutor::{DEFAULT_MODEL, DEFAULT_VOICE};

/// Configuration for one conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Unique session identifier
    pub session_id: String,

    /// Model to converse with
    pub model: String,

    /// Prebuilt voice used for synthesized replies
    pub voice: String,

    /// System instruction describing the tutoring persona and scenario
    pub system_instruction: String,

    /// Microphone sample rate in Hz (the service expects 16kHz input)
    pub capture_sample_rate: u32,

    /// Reply audio sample rate in Hz (the service synthesizes at 24kHz)
    pub playback_sample_rate: u32,

    /// Samples per captured frame
    pub frame_samples: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            session_id: format!("conversation-{}", uuid::Uuid::new_v4()),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: String::new(),
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            frame_samples: 4096,
        }
    }
}
