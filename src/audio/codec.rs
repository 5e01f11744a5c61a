// PCM wire codec.
//
// Outbound microphone audio is float samples in [-1, 1]; the service expects
// base64-encoded 16-bit little-endian PCM. Inbound synthesized audio arrives
// the same way and is decoded back to float chunks for the playback timeline.

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::capture::AudioFrame;
use super::playback::PlaybackChunk;
use crate::error::{LingoError, Result};

/// Mime type for outbound capture audio
pub const CAPTURE_MIME: &str = "audio/pcm;rate=16000";

/// A base64 PCM payload with its mime type, as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlob {
    pub mime_type: String,
    pub data: String,
}

impl WireBlob {
    /// Parse the sample rate out of a mime type like `audio/pcm;rate=24000`
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }
}

/// Quantize float samples to 16-bit PCM.
///
/// Scales by 32768 and clamps the product to the i16 range, so -1.0 maps to
/// -32768 and 1.0 saturates at 32767.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Map a 16-bit PCM sample back to float
pub fn dequantize(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Pack i16 samples into little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Unpack little-endian bytes into i16 samples (a trailing odd byte is dropped)
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode raw float capture samples into a wire blob
pub fn encode_samples(samples: &[f32]) -> WireBlob {
    let bytes = samples_to_bytes(&quantize(samples));
    WireBlob {
        mime_type: CAPTURE_MIME.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }
}

/// Encode a capture frame into a wire blob
pub fn encode_frame(frame: &AudioFrame) -> WireBlob {
    let bytes = samples_to_bytes(&frame.samples);
    WireBlob {
        mime_type: format!("audio/pcm;rate={}", frame.sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }
}

/// Decode a base64 audio payload into raw PCM bytes
pub fn decode_payload(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| LingoError::MalformedPayload(e.to_string()))
}

/// Decode raw PCM bytes into a playback chunk, de-interleaving into
/// channel-major float samples
pub fn decode_chunk(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PlaybackChunk> {
    if channels == 0 {
        return Err(LingoError::InvalidAudioFormat(
            "channel count must be non-zero".to_string(),
        ));
    }

    let stride = 2 * channels as usize;
    if bytes.len() % stride != 0 {
        return Err(LingoError::InvalidAudioFormat(format!(
            "{} bytes is not a whole number of {}-channel sample frames",
            bytes.len(),
            channels
        )));
    }

    let samples = bytes_to_samples(bytes);
    let per_channel = samples.len() / channels as usize;
    let mut planes: Vec<Vec<f32>> = (0..channels)
        .map(|_| Vec::with_capacity(per_channel))
        .collect();
    for (i, &sample) in samples.iter().enumerate() {
        planes[i % channels as usize].push(dequantize(sample));
    }

    Ok(PlaybackChunk {
        channels: planes,
        sample_rate,
    })
}
