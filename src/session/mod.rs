//! Conversation session management
//!
//! This module provides the `Conversation` abstraction that manages:
//! - Microphone capture and frame encoding for the live service
//! - Gapless scheduling of synthesized reply audio
//! - Turn-based transcript aggregation for both speakers
//! - Lifecycle phases, notices and teardown

mod config;
mod manager;
mod transcript;

pub use config::ConversationConfig;
pub use manager::{CloseReason, Conversation, SessionNotice, SessionPhase};
pub use transcript::{Speaker, TranscriptEntry, TurnAccumulator};
