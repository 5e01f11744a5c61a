// Microphone capture pipeline.
//
// The device stream is owned by a dedicated thread (cpal streams are not
// Send). The stream callback normalizes device audio to the capture format
// (mono, 16 kHz), slices it into fixed-size frames and sends them over an
// unbounded channel; audio callbacks must never block.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::codec;
use crate::error::{LingoError, Result};

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Offset since capture started, derived from the emitted sample count
    pub timestamp_ms: u64,
}

/// Configuration for the capture pipeline
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate expected by the service
    pub sample_rate: u32,
    /// Channel count (1 = mono)
    pub channels: u16,
    /// Samples per emitted frame
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // 16kHz mono PCM input
            channels: 1,
            frame_samples: 4096,
        }
    }
}

/// Accumulates normalized samples and emits fixed-size frames.
///
/// Frame timestamps come from the emitted sample count, not wall clock, so
/// slicing is deterministic: the i-th frame starts at
/// `i * frame_samples / sample_rate` seconds.
#[derive(Debug)]
pub struct FrameSlicer {
    sample_rate: u32,
    channels: u16,
    frame_samples: usize,
    pending: Vec<i16>,
    frames_emitted: u64,
}

impl FrameSlicer {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_samples: config.frame_samples,
            pending: Vec::with_capacity(config.frame_samples),
            frames_emitted: 0,
        }
    }

    /// Push float samples in [-1, 1]; returns every frame completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.push_i16(&codec::quantize(samples))
    }

    /// Push already-quantized samples
    pub fn push_i16(&mut self, samples: &[i16]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let samples = std::mem::replace(&mut self.pending, rest);

            let timestamp_ms =
                self.frames_emitted * self.frame_samples as u64 * 1000 / self.sample_rate as u64;
            frames.push(AudioFrame {
                samples,
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms,
            });
            self.frames_emitted += 1;
        }
        frames
    }

    /// Samples buffered toward the next frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Fold interleaved multi-channel samples down to mono
pub fn fold_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|group| {
            let sum: f32 = group.iter().sum();
            sum.clamp(-1.0, 1.0)
        })
        .collect()
}

/// Downsample by decimation: take every ratio-th sample
pub fn decimate(samples: &[f32], ratio: u32) -> Vec<f32> {
    if ratio <= 1 {
        return samples.to_vec();
    }

    samples.iter().step_by(ratio as usize).copied().collect()
}

/// Audio capture backend trait
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive capture frames
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

struct CaptureWorker {
    shutdown_tx: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Microphone backend on the default input device
pub struct CpalCapture {
    config: CaptureConfig,
    worker: Option<CaptureWorker>,
}

impl CpalCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for CpalCapture {
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>> {
        if self.worker.is_some() {
            return Err(LingoError::AlreadyActive);
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                run_input_stream(config, frame_tx, shutdown_rx, ready_tx);
            })
            .map_err(|e| LingoError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker {
                    shutdown_tx,
                    handle,
                });
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(LingoError::DeviceUnavailable(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let _ = worker.shutdown_tx.send(());
        let handle = worker.handle;
        let joined = tokio::task::spawn_blocking(move || handle.join()).await;
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("Capture thread panicked during shutdown"),
            Err(e) => warn!("Failed to join capture thread: {}", e),
        }

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal-input"
    }
}

/// Per-stream state shared by the input callbacks: normalize, slice, send
struct CaptureSink {
    slicer: FrameSlicer,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    device_channels: u16,
    decimation: u32,
}

impl CaptureSink {
    fn push(&mut self, data: &[f32]) {
        let mono = fold_to_mono(data, self.device_channels);
        let resampled = decimate(&mono, self.decimation);
        for frame in self.slicer.push(&resampled) {
            if self.frame_tx.send(frame).is_err() {
                // Receiver dropped; the stream is being shut down
                return;
            }
        }
    }
}

/// Thread body: open the input stream, report readiness, park until shutdown
fn run_input_stream(
    config: CaptureConfig,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    shutdown_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let stream = match open_input_stream(&config, frame_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Park until stop(); dropping the stream closes the device
    let _ = shutdown_rx.recv();
    drop(stream);
}

fn open_input_stream(
    config: &CaptureConfig,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or_else(|| {
        LingoError::DeviceUnavailable("no default input device".to_string())
    })?;

    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    // Preferred path: ask the device for the capture format directly
    let desired = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Default,
    };
    let sink = CaptureSink {
        slicer: FrameSlicer::new(config),
        frame_tx: frame_tx.clone(),
        device_channels: config.channels,
        decimation: 1,
    };
    match build_f32_stream(&device, &desired, sink) {
        Ok(stream) => return Ok(stream),
        Err(LingoError::InvalidAudioFormat(msg)) => {
            info!(
                "Device rejected {}Hz mono capture ({}), falling back to its native format",
                config.sample_rate, msg
            );
        }
        Err(e) => return Err(e),
    }

    // Fallback: open the device-native format and normalize in the callback
    let native = device.default_input_config()?;
    let native_rate = native.sample_rate().0;
    let native_channels = native.channels();

    if native_rate % config.sample_rate != 0 {
        return Err(LingoError::InvalidAudioFormat(format!(
            "device rate {}Hz is not an integer multiple of {}Hz",
            native_rate, config.sample_rate
        )));
    }

    info!(
        "Capturing at device-native {}Hz / {} channels, decimating to {}Hz mono",
        native_rate, native_channels, config.sample_rate
    );

    let sink = CaptureSink {
        slicer: FrameSlicer::new(config),
        frame_tx,
        device_channels: native_channels,
        decimation: native_rate / config.sample_rate,
    };
    let stream_config: StreamConfig = native.config();

    match native.sample_format() {
        SampleFormat::F32 => build_f32_stream(&device, &stream_config, sink),
        SampleFormat::I16 => build_i16_stream(&device, &stream_config, sink),
        other => Err(LingoError::InvalidAudioFormat(format!(
            "unsupported input sample format {:?}",
            other
        ))),
    }
}

fn build_f32_stream(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    mut sink: CaptureSink,
) -> Result<cpal::Stream> {
    let stream = device.build_input_stream(
        stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            sink.push(data);
        },
        move |err| {
            warn!("Input stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

fn build_i16_stream(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    mut sink: CaptureSink,
) -> Result<cpal::Stream> {
    let stream = device.build_input_stream(
        stream_config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            let floats: Vec<f32> = data.iter().map(|&s| codec::dequantize(s)).collect();
            sink.push(&floats);
        },
        move |err| {
            warn!("Input stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}
