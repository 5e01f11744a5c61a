// Playback scheduler for synthesized replies.
//
// The service streams reply audio in chunks that must play back to back with
// no gaps. Scheduling is done on a sample-based timeline:
// - playhead: samples rendered to the device since the timeline started
// - cursor (next_start): where the next chunk will be scheduled
//
// A chunk is enqueued at max(cursor, playhead), so consecutive chunks are
// sample-contiguous while a chunk arriving after the queue drained snaps
// forward to "now". An interrupt clears every in-flight chunk and resets the
// cursor, which combined with the snap-forward rule makes the next chunk
// start immediately.

use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{LingoError, Result};

/// Decoded service audio: channel-major float samples at a fixed rate
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    /// One plane per channel; all planes have equal length
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PlaybackChunk {
    /// Build a mono chunk from a single plane of samples
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            channels: vec![samples],
            sample_rate,
        }
    }

    /// Samples per channel
    pub fn num_samples(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Duration of this chunk in seconds
    pub fn duration_secs(&self) -> f64 {
        self.num_samples() as f64 / self.sample_rate as f64
    }

    /// Fold all channels into one mono plane by averaging
    pub fn fold_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => {
                let len = self.num_samples();
                let mut mono = vec![0.0f32; len];
                for plane in &self.channels {
                    for (acc, &s) in mono.iter_mut().zip(plane) {
                        *acc += s;
                    }
                }
                for s in &mut mono {
                    *s /= n as f32;
                }
                mono
            }
        }
    }
}

/// A chunk placed on the timeline
#[derive(Debug)]
struct Scheduled {
    /// Start position in samples since timeline start
    start: u64,
    samples: Vec<f32>,
}

/// Sample-based playback timeline.
///
/// Pure state machine: the device callback drives it through `render`, the
/// session loop through `enqueue`/`interrupt`. All positions are u64 sample
/// counts at the timeline rate, so chunk boundaries are exact.
#[derive(Debug)]
pub struct Timeline {
    sample_rate: u32,
    playhead: u64,
    next_start: u64,
    scheduled: Vec<Scheduled>,
    next_id: u64,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            playhead: 0,
            next_start: 0,
            scheduled: Vec::new(),
            next_id: 0,
        }
    }

    /// Schedule a chunk for gapless playback.
    ///
    /// Chunks whose sample rate differs from the timeline are dropped with a
    /// warning; empty chunks are ignored. Returns the chunk id when
    /// scheduled.
    pub fn enqueue(&mut self, chunk: PlaybackChunk) -> Option<u64> {
        if chunk.sample_rate != self.sample_rate {
            warn!(
                "Chunk sample rate mismatch: expected {}, got {}. Dropping chunk.",
                self.sample_rate, chunk.sample_rate
            );
            return None;
        }

        let samples = chunk.fold_mono();
        if samples.is_empty() {
            debug!("Ignoring empty playback chunk");
            return None;
        }

        let start = self.next_start.max(self.playhead);
        self.next_start = start + samples.len() as u64;

        let id = self.next_id;
        self.next_id += 1;

        debug!(
            "Scheduled chunk {} at sample {} ({} samples)",
            id,
            start,
            self.next_start - start
        );
        self.scheduled.push(Scheduled { start, samples });
        Some(id)
    }

    /// Render the next window of output and advance the playhead.
    ///
    /// Mixes the overlap of every in-flight chunk into `out` (sum, clamped
    /// to [-1, 1]); chunks that finished inside the window are retired.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let begin = self.playhead;
        let end = begin + out.len() as u64;

        for chunk in &self.scheduled {
            let chunk_start = chunk.start;
            let chunk_end = chunk_start + chunk.samples.len() as u64;
            if chunk_end <= begin || chunk_start >= end {
                continue;
            }

            let from = chunk_start.max(begin);
            let to = chunk_end.min(end);
            for pos in from..to {
                out[(pos - begin) as usize] += chunk.samples[(pos - chunk_start) as usize];
            }
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        self.playhead = end;
        self.scheduled
            .retain(|c| c.start + c.samples.len() as u64 > end);
    }

    /// Stop everything scheduled: clear in-flight chunks and reset the
    /// cursor so the next enqueue starts at the current playhead. Returns
    /// the number of chunks cancelled.
    pub fn interrupt(&mut self) -> usize {
        let cancelled = self.scheduled.len();
        self.scheduled.clear();
        self.next_start = 0;
        cancelled
    }

    /// Full reset for teardown: clear chunks, playhead and cursor
    pub fn reset(&mut self) {
        self.scheduled.clear();
        self.playhead = 0;
        self.next_start = 0;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples rendered since the timeline started
    pub fn playhead(&self) -> u64 {
        self.playhead
    }

    /// Where the next chunk will be scheduled
    pub fn cursor(&self) -> u64 {
        self.next_start.max(self.playhead)
    }

    /// Number of chunks scheduled or playing
    pub fn in_flight(&self) -> usize {
        self.scheduled.len()
    }
}

/// Timeline shared between the session loop and the device callback
pub type SharedTimeline = Arc<Mutex<Timeline>>;

/// Lock the timeline, recovering from a poisoned lock: a panicked render
/// tick must not wedge every later call
pub fn lock_timeline(timeline: &SharedTimeline) -> MutexGuard<'_, Timeline> {
    timeline
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Audio playback backend trait
#[async_trait::async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Start rendering the shared timeline to the output device
    async fn start(&mut self, timeline: SharedTimeline) -> Result<()>;

    /// Stop rendering
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently rendering
    fn is_playing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

struct PlaybackWorker {
    shutdown_tx: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Speaker backend on the default output device
pub struct CpalPlayback {
    worker: Option<PlaybackWorker>,
}

impl CpalPlayback {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for CpalPlayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for CpalPlayback {
    async fn start(&mut self, timeline: SharedTimeline) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                run_output_stream(timeline, shutdown_rx, ready_tx);
            })
            .map_err(|e| LingoError::Playback(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.worker = Some(PlaybackWorker {
                    shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(LingoError::Playback(
                    "playback thread exited before opening the device".to_string(),
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
            Ok(Err(_)) => warn!("Playback thread panicked during shutdown"),
            Err(e) => warn!("Failed to join playback thread: {}", e),
        }

        info!("Audio playback stopped");
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal-output"
    }
}

/// Thread body: open the output stream, report readiness, park until shutdown
fn run_output_stream(
    timeline: SharedTimeline,
    shutdown_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let stream = match open_output_stream(timeline) {
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

    let _ = shutdown_rx.recv();
    drop(stream);
}

fn open_output_stream(timeline: SharedTimeline) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| {
        LingoError::DeviceUnavailable("no default output device".to_string())
    })?;

    info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let sample_rate = lock_timeline(&timeline).sample_rate();
    let channels = device.default_output_config()?.channels();
    let stream_config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    // Reused across callbacks so the render path does not allocate
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels as usize;
            scratch.resize(frames, 0.0);
            lock_timeline(&timeline).render(&mut scratch);

            for (frame, &sample) in data.chunks_exact_mut(channels as usize).zip(&scratch) {
                for out in frame.iter_mut() {
                    *out = sample;
                }
            }
        },
        move |err| {
            warn!("Output stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

/// No-device backend for headless hosts and tests; the timeline only
/// advances when something else calls `render`
pub struct NullPlayback {
    playing: bool,
}

impl NullPlayback {
    pub fn new() -> Self {
        Self { playing: false }
    }
}

impl Default for NullPlayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for NullPlayback {
    async fn start(&mut self, _timeline: SharedTimeline) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn name(&self) -> &str {
        "null-output"
    }
}

/// Facade owning the shared timeline and the output backend
pub struct PlaybackScheduler {
    timeline: SharedTimeline,
    backend: tokio::sync::Mutex<Box<dyn PlaybackBackend>>,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32, backend: Box<dyn PlaybackBackend>) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Timeline::new(sample_rate))),
            backend: tokio::sync::Mutex::new(backend),
        }
    }

    /// Start rendering to the output device
    pub async fn start(&self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        info!("Starting playback backend: {}", backend.name());
        backend.start(Arc::clone(&self.timeline)).await
    }

    /// Schedule a chunk; returns its id, or None if it was dropped
    pub fn enqueue(&self, chunk: PlaybackChunk) -> Option<u64> {
        lock_timeline(&self.timeline).enqueue(chunk)
    }

    /// Cancel everything in flight; the next chunk plays immediately
    pub fn interrupt(&self) -> usize {
        let cancelled = lock_timeline(&self.timeline).interrupt();
        if cancelled > 0 {
            info!("Playback interrupted, {} chunks cancelled", cancelled);
        }
        cancelled
    }

    /// Stop the backend and clear the timeline. Idempotent; backend errors
    /// are logged, never propagated.
    pub async fn teardown(&self) {
        let mut backend = self.backend.lock().await;
        if backend.is_playing() {
            if let Err(e) = backend.stop().await {
                warn!("Failed to stop playback backend: {}", e);
            }
        }
        lock_timeline(&self.timeline).reset();
    }

    pub fn playhead(&self) -> u64 {
        lock_timeline(&self.timeline).playhead()
    }

    pub fn cursor(&self) -> u64 {
        lock_timeline(&self.timeline).cursor()
    }

    pub fn in_flight(&self) -> usize {
        lock_timeline(&self.timeline).in_flight()
    }

    /// Drive the timeline manually; hosts using `NullPlayback` can call this
    /// to consume scheduled audio
    pub fn render(&self, out: &mut [f32]) {
        lock_timeline(&self.timeline).render(out);
    }
}
