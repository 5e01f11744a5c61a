pub mod audio;
pub mod config;
pub mod error;
pub mod live;
pub mod session;
pub mod tutor;

pub use audio::{
    AudioFrame, CaptureBackend, CaptureConfig, CpalCapture, CpalPlayback, NullPlayback,
    PlaybackBackend, PlaybackChunk, PlaybackScheduler, WireBlob,
};
pub use config::Config;
pub use error::{LingoError, Result};
pub use live::{GeminiConnector, LiveConnection, LiveConnector, LiveEvent, SessionSetup};
pub use session::{
    CloseReason, Conversation, ConversationConfig, SessionNotice, SessionPhase, Speaker,
    TranscriptEntry, TurnAccumulator,
};
pub use tutor::{Language, Proficiency, Scenario, SCENARIOS};
