pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{AudioFrame, CaptureBackend, CaptureConfig, CpalCapture, FrameSlicer};
pub use codec::{decode_chunk, encode_frame, encode_samples, WireBlob, CAPTURE_MIME};
pub use playback::{
    CpalPlayback, NullPlayback, PlaybackBackend, PlaybackChunk, PlaybackScheduler, SharedTimeline,
    Timeline,
};
