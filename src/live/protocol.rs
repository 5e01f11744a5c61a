// Wire types for the live conversation protocol.
//
// Every message is a JSON object with a single top-level key. The client
// sends `setup` once, then `realtimeInput` for each captured audio frame.
// The service answers with `setupComplete` followed by a stream of
// `serverContent` messages carrying reply audio, transcriptions and turn
// markers. Unknown inbound fields are ignored.

use serde::{Deserialize, Serialize};

use crate::audio::codec::WireBlob;
use crate::live::events::LiveEvent;

/// Message sent to the service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

/// Session configuration, sent once after connecting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

impl Setup {
    /// Audio-in, audio-out session with transcription of both directions
    pub fn new(model: &str, voice: &str, system_instruction: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part::text(system_instruction)],
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Serializes as `{}`; presence of the field turns transcription on
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Content part, either text or inline binary data
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<WireBlob>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Streaming audio input carrying one or more encoded frames
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<WireBlob>,
}

impl RealtimeInput {
    pub fn audio(blob: WireBlob) -> Self {
        Self {
            media_chunks: vec![blob],
        }
    }
}

/// Message received from the service
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub turn_complete: bool,
    pub interrupted: bool,
    pub generation_complete: bool,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

impl ServerMessage {
    /// Flatten one wire message into session events.
    ///
    /// A single message can carry several payloads at once; transcription
    /// deltas come first, then audio, then the interrupt flag, with
    /// `TurnComplete` always last so turn state settles after its content.
    pub fn into_events(self) -> Vec<LiveEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(LiveEvent::Opened);
        }

        let Some(content) = self.server_content else {
            return events;
        };

        if let Some(transcription) = content.input_transcription {
            if !transcription.text.is_empty() {
                events.push(LiveEvent::InputTranscript {
                    text: transcription.text,
                });
            }
        }
        if let Some(transcription) = content.output_transcription {
            if !transcription.text.is_empty() {
                events.push(LiveEvent::OutputTranscript {
                    text: transcription.text,
                });
            }
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    events.push(LiveEvent::Audio { blob });
                }
            }
        }

        if content.interrupted {
            events.push(LiveEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(LiveEvent::TurnComplete);
        }

        events
    }
}
