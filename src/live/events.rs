use crate::audio::codec::WireBlob;

/// Event emitted by a live conversation connection.
///
/// The session loop consumes these through a single channel, so transport
/// and protocol details stay inside the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Service acknowledged setup; audio streaming may begin
    Opened,
    /// Synthesized reply audio chunk
    Audio { blob: WireBlob },
    /// Incremental transcription of the user's speech
    InputTranscript { text: String },
    /// Incremental transcription of the reply
    OutputTranscript { text: String },
    /// The reply turn finished
    TurnComplete,
    /// The user spoke over the reply; queued audio is stale
    Interrupted,
    /// Connection closed by the remote end
    Closed,
    /// Transport or protocol failure
    Error { message: String },
}
