use serde::Deserialize;

use crate::error::Result;
use crate::live::DEFAULT_ENDPOINT;
use crate::tutor::{DEFAULT_MODEL, DEFAULT_VOICE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// WebSocket endpoint of the conversational service
    pub endpoint: String,
    pub model: String,
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Microphone capture rate expected by the service (Hz)
    pub capture_sample_rate: u32,
    /// Rate of the synthesized audio the service returns (Hz)
    pub playback_sample_rate: u32,
    pub channels: u16,
    /// Samples per outbound capture frame
    pub frame_samples: usize,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "lingo-live".to_string(),
                endpoint: DEFAULT_ENDPOINT.to_string(),
                model: DEFAULT_MODEL.to_string(),
                voice: DEFAULT_VOICE.to_string(),
            },
            audio: AudioConfig {
                capture_sample_rate: 16000,
                playback_sample_rate: 24000,
                channels: 1,
                frame_samples: 4096,
            },
        }
    }
}
