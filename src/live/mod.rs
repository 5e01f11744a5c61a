pub mod client;
pub mod events;
pub mod protocol;

pub use client::{
    GeminiConnector, LiveConnection, LiveConnector, SessionSetup, DEFAULT_ENDPOINT,
};
pub use events::LiveEvent;
pub use protocol::{ClientMessage, RealtimeInput, ServerMessage, Setup};
