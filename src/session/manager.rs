use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::ConversationConfig;
use super::transcript::{TranscriptEntry, TurnAccumulator};
use crate::audio::capture::CaptureBackend;
use crate::audio::codec::{self, WireBlob};
use crate::audio::playback::{PlaybackBackend, PlaybackScheduler};
use crate::error::{LingoError, Result};
use crate::live::{LiveConnection, LiveConnector, LiveEvent, SessionSetup};

/// How long `end` waits for the session loop before aborting it
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle phase of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Active,
    Closing,
    Failed,
}

/// Why a conversation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The host asked for the end
    Local,
    /// The service closed the connection
    Remote,
    /// Something broke mid-session
    Failed(String),
}

/// Notification pushed to the host while a conversation runs
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// A turn completed and produced a transcript entry
    Transcript(TranscriptEntry),
    /// A non-recoverable session error
    Error { message: String },
    /// The session is over; no further notices follow
    Ended { reason: CloseReason },
}

/// Command sent from the handle into the session loop
enum SessionCommand {
    End,
}

/// The handle's side of the command channel.
///
/// `end` flips the slot to `Cancelled`; a `start` that has not wired its
/// loop yet observes that and abandons the attempt instead of going active.
enum SessionControl {
    /// No session loop wired
    Idle,
    /// `end` was called; nothing may be wired anymore
    Cancelled,
    /// The loop is reachable over this channel
    Running(mpsc::UnboundedSender<SessionCommand>),
}

/// State shared between the conversation handle and its session loop
struct SessionShared {
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
    phase_tx: watch::Sender<SessionPhase>,
    transcript: std::sync::Mutex<Vec<TranscriptEntry>>,
    ended: AtomicBool,
}

impl SessionShared {
    fn set_phase(&self, phase: SessionPhase) {
        let _ = self.phase_tx.send(phase);
    }

    fn push_entry(&self, entry: TranscriptEntry) {
        lock(&self.transcript).push(entry.clone());
        let _ = self.notice_tx.send(SessionNotice::Transcript(entry));
    }

    /// Emit the terminal notice exactly once, no matter how many paths
    /// race to end the session
    fn finish(&self, reason: CloseReason) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        match &reason {
            CloseReason::Local => {
                info!("Conversation ended");
                self.set_phase(SessionPhase::Idle);
            }
            CloseReason::Remote => {
                info!("Conversation ended by the service");
                self.set_phase(SessionPhase::Idle);
            }
            CloseReason::Failed(message) => {
                error!("Conversation failed: {}", message);
                let _ = self.notice_tx.send(SessionNotice::Error {
                    message: message.clone(),
                });
                self.set_phase(SessionPhase::Failed);
            }
        }

        let _ = self.notice_tx.send(SessionNotice::Ended { reason });
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A voice conversation with the language tutor.
///
/// One handle covers one session. `start` connects and begins streaming
/// microphone audio; reply audio plays through the scheduler while turn
/// transcripts accumulate. `end` tears everything down and is safe to call
/// any number of times.
pub struct Conversation {
    config: ConversationConfig,
    connector: Arc<dyn LiveConnector>,
    capture: Mutex<Option<Box<dyn CaptureBackend>>>,
    scheduler: Arc<PlaybackScheduler>,
    shared: Arc<SessionShared>,
    phase_rx: watch::Receiver<SessionPhase>,
    notice_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SessionNotice>>>,
    control: std::sync::Mutex<SessionControl>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Conversation {
    pub fn new(
        config: ConversationConfig,
        connector: Arc<dyn LiveConnector>,
        capture: Box<dyn CaptureBackend>,
        playback: Box<dyn PlaybackBackend>,
    ) -> Self {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);

        let scheduler = Arc::new(PlaybackScheduler::new(
            config.playback_sample_rate,
            playback,
        ));

        Self {
            config,
            connector,
            capture: Mutex::new(Some(capture)),
            scheduler,
            shared: Arc::new(SessionShared {
                notice_tx,
                phase_tx,
                transcript: std::sync::Mutex::new(Vec::new()),
                ended: AtomicBool::new(false),
            }),
            phase_rx,
            notice_rx: std::sync::Mutex::new(Some(notice_rx)),
            control: std::sync::Mutex::new(SessionControl::Idle),
            task: Mutex::new(None),
        }
    }

    /// Connect to the service and start streaming.
    ///
    /// Returns once the connection is open and the session loop is running;
    /// the phase moves to `Active` when the service acknowledges setup.
    pub async fn start(&self) -> Result<()> {
        if self.shared.ended.load(Ordering::SeqCst) || self.is_cancelled() {
            return Err(LingoError::Session(
                "conversation already finished".to_string(),
            ));
        }
        if self.phase() != SessionPhase::Idle {
            return Err(LingoError::AlreadyActive);
        }
        let capture = self
            .capture
            .lock()
            .await
            .take()
            .ok_or(LingoError::AlreadyActive)?;

        info!("Starting conversation {}", self.config.session_id);
        self.shared.set_phase(SessionPhase::Connecting);

        let setup = SessionSetup {
            model: self.config.model.clone(),
            voice: self.config.voice.clone(),
            system_instruction: self.config.system_instruction.clone(),
        };
        let mut connection = match self.connector.connect(&setup).await {
            Ok(connection) => connection,
            Err(e) => {
                if self.is_cancelled() {
                    info!("Conversation ended during connect");
                    self.shared.finish(CloseReason::Local);
                    return Ok(());
                }
                self.shared.finish(CloseReason::Failed(e.to_string()));
                return Err(e);
            }
        };
        let Some(events) = connection.take_events() else {
            let message = "connection produced no event stream".to_string();
            self.shared.finish(CloseReason::Failed(message.clone()));
            return Err(LingoError::ConnectFailure(message));
        };

        // An `end` that raced the connect wins: wire the loop only while the
        // handle is still live, otherwise abandon the fresh connection before
        // the microphone ever starts.
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancelled = {
            let mut control = lock(&self.control);
            if matches!(*control, SessionControl::Cancelled) {
                true
            } else {
                *control = SessionControl::Running(cmd_tx);
                false
            }
        };
        if cancelled {
            info!("Conversation ended during connect");
            if let Err(e) = connection.close().await {
                warn!("Failed to close connection: {}", e);
            }
            self.scheduler.teardown().await;
            self.shared.finish(CloseReason::Local);
            return Ok(());
        }

        let runtime = SessionRuntime {
            playback_sample_rate: self.config.playback_sample_rate,
            connection,
            events,
            capture,
            scheduler: Arc::clone(&self.scheduler),
            shared: Arc::clone(&self.shared),
            cmd_rx,
            turns: TurnAccumulator::new(),
        };
        let task = tokio::spawn(runtime.run());
        *self.task.lock().await = Some(task);

        Ok(())
    }

    /// End the conversation and release the microphone and speaker.
    ///
    /// Safe to call repeatedly and before `start`; later calls are no-ops.
    /// An `end` that lands while `start` is still connecting cancels the
    /// attempt and the session finishes without capture ever starting.
    pub async fn end(&self) -> Result<()> {
        let control = std::mem::replace(&mut *lock(&self.control), SessionControl::Cancelled);
        if let SessionControl::Running(cmd_tx) = control {
            let _ = cmd_tx.send(SessionCommand::End);
        }

        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };

        info!("Ending conversation {}", self.config.session_id);

        let abort = task.abort_handle();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Session loop panicked: {}", e),
            Err(_) => {
                warn!("Session loop did not shut down in time, aborting");
                abort.abort();
                self.scheduler.teardown().await;
                self.shared.finish(CloseReason::Local);
            }
        }

        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        matches!(*lock(&self.control), SessionControl::Cancelled)
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase_rx.borrow()
    }

    /// Watch phase transitions
    pub fn phase_updates(&self) -> watch::Receiver<SessionPhase> {
        self.phase_rx.clone()
    }

    /// Completed turns so far, in order
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        lock(&self.shared.transcript).clone()
    }

    /// Take the notice stream; `None` after the first call
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<SessionNotice>> {
        lock(&self.notice_rx).take()
    }

    /// Reply playback state, for hosts that drive output themselves
    pub fn playback(&self) -> &PlaybackScheduler {
        &self.scheduler
    }
}

/// Everything the session loop owns while it runs
struct SessionRuntime {
    playback_sample_rate: u32,
    connection: Box<dyn LiveConnection>,
    events: mpsc::UnboundedReceiver<LiveEvent>,
    capture: Box<dyn CaptureBackend>,
    scheduler: Arc<PlaybackScheduler>,
    shared: Arc<SessionShared>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    turns: TurnAccumulator,
}

impl SessionRuntime {
    async fn run(mut self) {
        let reason = self.drive().await;
        self.shutdown(reason).await;
    }

    /// Main loop: wait for the service acknowledgement, then pump captured
    /// frames up and service events down until something ends the session
    async fn drive(&mut self) -> CloseReason {
        loop {
            tokio::select! {
                _ = self.cmd_rx.recv() => return CloseReason::Local,
                event = self.events.recv() => match event {
                    Some(LiveEvent::Opened) => break,
                    Some(LiveEvent::Error { message }) => return CloseReason::Failed(message),
                    Some(LiveEvent::Closed) | None => {
                        return CloseReason::Failed("connection closed during setup".to_string());
                    }
                    Some(_) => {}
                },
            }
        }

        if let Err(e) = self.scheduler.start().await {
            return CloseReason::Failed(e.to_string());
        }
        let mut frames = match self.capture.start().await {
            Ok(frames) => frames,
            Err(e) => return CloseReason::Failed(e.to_string()),
        };

        self.shared.set_phase(SessionPhase::Active);
        info!("Conversation active");

        loop {
            tokio::select! {
                _ = self.cmd_rx.recv() => return CloseReason::Local,
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = self.connection.send_audio(codec::encode_frame(&frame)).await {
                            return CloseReason::Failed(e.to_string());
                        }
                    }
                    None => {
                        return CloseReason::Failed(
                            "microphone stream ended unexpectedly".to_string(),
                        );
                    }
                },
                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(reason) = self.handle_event(event) {
                            return reason;
                        }
                    }
                    None => return CloseReason::Remote,
                },
            }
        }
    }

    /// Apply one service event; returns a close reason when the session is
    /// over
    fn handle_event(&mut self, event: LiveEvent) -> Option<CloseReason> {
        match event {
            LiveEvent::Opened => None,
            LiveEvent::Audio { blob } => {
                self.schedule_audio(blob);
                None
            }
            LiveEvent::InputTranscript { text } => {
                self.turns.push_user(&text);
                None
            }
            LiveEvent::OutputTranscript { text } => {
                self.turns.push_assistant(&text);
                None
            }
            LiveEvent::TurnComplete => {
                for entry in self.turns.flush() {
                    self.shared.push_entry(entry);
                }
                None
            }
            LiveEvent::Interrupted => {
                self.scheduler.interrupt();
                None
            }
            LiveEvent::Closed => Some(CloseReason::Remote),
            LiveEvent::Error { message } => Some(CloseReason::Failed(message)),
        }
    }

    /// Decode one reply chunk onto the playback timeline. A chunk that does
    /// not decode is dropped; the session keeps running.
    fn schedule_audio(&self, blob: WireBlob) {
        let sample_rate = blob.sample_rate().unwrap_or(self.playback_sample_rate);
        let chunk = codec::decode_payload(&blob.data)
            .and_then(|bytes| codec::decode_chunk(&bytes, sample_rate, 1));
        match chunk {
            Ok(chunk) => {
                self.scheduler.enqueue(chunk);
            }
            Err(e) => warn!("Dropping malformed audio chunk: {}", e),
        }
    }

    /// Wait for already-scheduled reply audio to finish, bounded by the
    /// pending duration itself so a stalled backend cannot hang shutdown
    async fn drain_playback(&mut self) {
        let pending = self
            .scheduler
            .cursor()
            .saturating_sub(self.scheduler.playhead());
        if pending == 0 {
            return;
        }

        let budget =
            Duration::from_secs(pending / u64::from(self.playback_sample_rate.max(1)) + 1);
        let deadline = tokio::time::Instant::now() + budget;
        while self.scheduler.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn shutdown(mut self, reason: CloseReason) {
        self.shared.set_phase(SessionPhase::Closing);

        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop capture: {}", e);
        }
        if let Err(e) = self.connection.close().await {
            warn!("Failed to close connection: {}", e);
        }

        // A clean remote close lets the scheduled reply tail play out; the
        // local and failure paths cut it off.
        if reason == CloseReason::Remote {
            self.drain_playback().await;
        }
        self.scheduler.teardown().await;

        // Fragments from a turn that never completed are not transcript
        if !self.turns.is_empty() {
            info!("Discarding partial turn from interrupted session");
        }

        self.shared.finish(reason);
    }
}
