// Integration tests for the conversation session loop.
//
// The live service and the microphone are replaced with scripted fakes, so
// these tests drive the full path: service events in, captured frames out,
// playback scheduling and turn-based transcript aggregation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use tokio::sync::{mpsc, oneshot};

use lingo_live::{
    AudioFrame, CaptureBackend, CloseReason, Conversation, ConversationConfig, LingoError,
    LiveConnection, LiveConnector, LiveEvent, NullPlayback, SessionNotice, SessionPhase,
    SessionSetup, Speaker, WireBlob,
};

/// Scripted connection factory: each connect hands out the next prepared
/// event stream and records every audio blob sent upstream.
struct FakeConnector {
    scripts: Mutex<VecDeque<mpsc::UnboundedReceiver<LiveEvent>>>,
    sent: Arc<Mutex<Vec<WireBlob>>>,
}

impl FakeConnector {
    fn new(scripts: Vec<mpsc::UnboundedReceiver<LiveEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn single(events: mpsc::UnboundedReceiver<LiveEvent>) -> Arc<Self> {
        Self::new(vec![events])
    }

    fn sent(&self) -> Vec<WireBlob> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, _setup: &SessionSetup) -> lingo_live::Result<Box<dyn LiveConnection>> {
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LingoError::ConnectFailure("no scripted session left".to_string()))?;
        Ok(Box::new(FakeConnection {
            events: Some(events),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct FakeConnection {
    events: Option<mpsc::UnboundedReceiver<LiveEvent>>,
    sent: Arc<Mutex<Vec<WireBlob>>>,
}

#[async_trait]
impl LiveConnection for FakeConnection {
    async fn send_audio(&mut self, blob: WireBlob) -> lingo_live::Result<()> {
        self.sent.lock().unwrap().push(blob);
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LiveEvent>> {
        self.events.take()
    }

    async fn close(&mut self) -> lingo_live::Result<()> {
        Ok(())
    }
}

/// Connector that never reaches the service
struct FailingConnector;

#[async_trait]
impl LiveConnector for FailingConnector {
    async fn connect(&self, _setup: &SessionSetup) -> lingo_live::Result<Box<dyn LiveConnection>> {
        Err(LingoError::ConnectFailure("dns lookup failed".to_string()))
    }
}

/// Connector whose connect parks until the test opens the gate
struct GatedConnector {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    inner: Arc<FakeConnector>,
}

impl GatedConnector {
    fn new(events: mpsc::UnboundedReceiver<LiveEvent>) -> (oneshot::Sender<()>, Arc<Self>) {
        let (open_tx, open_rx) = oneshot::channel();
        let connector = Arc::new(Self {
            gate: Mutex::new(Some(open_rx)),
            inner: FakeConnector::single(events),
        });
        (open_tx, connector)
    }
}

#[async_trait]
impl LiveConnector for GatedConnector {
    async fn connect(&self, setup: &SessionSetup) -> lingo_live::Result<Box<dyn LiveConnection>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.connect(setup).await
    }
}

/// Capture backend fed by the test through a channel; dropping the sender
/// simulates the microphone dying
struct ChannelCapture {
    rx: Option<mpsc::UnboundedReceiver<AudioFrame>>,
    capturing: bool,
}

impl ChannelCapture {
    fn pair() -> (mpsc::UnboundedSender<AudioFrame>, Box<ChannelCapture>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Box::new(ChannelCapture {
                rx: Some(rx),
                capturing: false,
            }),
        )
    }
}

#[async_trait]
impl CaptureBackend for ChannelCapture {
    async fn start(&mut self) -> lingo_live::Result<mpsc::UnboundedReceiver<AudioFrame>> {
        let rx = self.rx.take().ok_or(LingoError::AlreadyActive)?;
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> lingo_live::Result<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted-mic"
    }
}

/// Capture backend whose device is denied
struct DeniedCapture;

#[async_trait]
impl CaptureBackend for DeniedCapture {
    async fn start(&mut self) -> lingo_live::Result<mpsc::UnboundedReceiver<AudioFrame>> {
        Err(LingoError::PermissionDenied("microphone blocked".to_string()))
    }

    async fn stop(&mut self) -> lingo_live::Result<()> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "denied-mic"
    }
}

/// Capture that records whether a session ever started it
struct TrackedCapture {
    started: Arc<AtomicBool>,
    _mic_tx: mpsc::UnboundedSender<AudioFrame>,
    inner: ChannelCapture,
}

impl TrackedCapture {
    fn pair() -> (Arc<AtomicBool>, Box<TrackedCapture>) {
        let (tx, inner) = ChannelCapture::pair();
        let started = Arc::new(AtomicBool::new(false));
        (
            Arc::clone(&started),
            Box::new(TrackedCapture {
                started,
                _mic_tx: tx,
                inner: *inner,
            }),
        )
    }
}

#[async_trait]
impl CaptureBackend for TrackedCapture {
    async fn start(&mut self) -> lingo_live::Result<mpsc::UnboundedReceiver<AudioFrame>> {
        self.started.store(true, Ordering::SeqCst);
        self.inner.start().await
    }

    async fn stop(&mut self) -> lingo_live::Result<()> {
        self.inner.stop().await
    }

    fn is_capturing(&self) -> bool {
        self.inner.is_capturing()
    }

    fn name(&self) -> &str {
        "tracked-mic"
    }
}

fn test_config() -> ConversationConfig {
    ConversationConfig {
        system_instruction: "Be a patient tutor.".to_string(),
        ..Default::default()
    }
}

fn conversation(
    connector: Arc<dyn LiveConnector>,
    capture: Box<dyn CaptureBackend>,
) -> Conversation {
    Conversation::new(test_config(), connector, capture, Box::new(NullPlayback::new()))
}

fn mic_frame(samples: usize) -> AudioFrame {
    AudioFrame {
        samples: vec![1000i16; samples],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    }
}

/// Reply audio blob carrying `samples` silent samples at 24kHz
fn reply_blob(samples: usize) -> WireBlob {
    let bytes: Vec<u8> = std::iter::repeat([0x00u8, 0x10]).take(samples).flatten().collect();
    WireBlob {
        mime_type: "audio/pcm;rate=24000".to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }
}

async fn wait_for_phase(conversation: &Conversation, phase: SessionPhase) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut updates = conversation.phase_updates();
    while conversation.phase() != phase {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for phase {:?}, still {:?}",
            phase,
            conversation.phase()
        );
        let _ = tokio::time::timeout(Duration::from_millis(50), updates.changed()).await;
    }
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn next_notice(notices: &mut mpsc::UnboundedReceiver<SessionNotice>) -> SessionNotice {
    tokio::time::timeout(Duration::from_secs(2), notices.recv())
        .await
        .expect("timed out waiting for notice")
        .expect("notice stream closed unexpectedly")
}

#[tokio::test]
async fn test_session_reaches_active_and_streams_frames() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector.clone(), capture);

    conversation.start().await?;
    assert_eq!(conversation.phase(), SessionPhase::Connecting);

    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    mic_tx.send(mic_frame(4096))?;
    mic_tx.send(mic_frame(4096))?;
    wait_until(|| connector.sent().len() == 2).await;

    let sent = connector.sent();
    assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
    let bytes = base64::engine::general_purpose::STANDARD.decode(&sent[0].data)?;
    assert_eq!(bytes.len(), 4096 * 2); // 16-bit samples

    conversation.end().await?;
    assert_eq!(conversation.phase(), SessionPhase::Idle);

    Ok(())
}

#[tokio::test]
async fn test_second_start_rejected_while_active() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    let err = conversation.start().await.unwrap_err();
    assert!(matches!(err, LingoError::AlreadyActive));

    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_turns_aggregate_into_transcript_entries() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);
    let mut notices = conversation.take_notices().unwrap();

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    // Deltas interleave across both directions during a turn
    for text in ["Hola", " ", "mundo"] {
        event_tx.send(LiveEvent::InputTranscript { text: text.to_string() })?;
    }
    for text in ["Hi", " there"] {
        event_tx.send(LiveEvent::OutputTranscript { text: text.to_string() })?;
    }
    event_tx.send(LiveEvent::TurnComplete)?;

    let first = next_notice(&mut notices).await;
    let SessionNotice::Transcript(entry) = first else {
        panic!("expected transcript notice, got {:?}", first);
    };
    assert_eq!(entry.speaker, Speaker::User);
    assert_eq!(entry.text, "Hola mundo");

    let second = next_notice(&mut notices).await;
    let SessionNotice::Transcript(entry) = second else {
        panic!("expected transcript notice, got {:?}", second);
    };
    assert_eq!(entry.speaker, Speaker::Assistant);
    assert_eq!(entry.text, "Hi there");

    let transcript = conversation.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].text, "Hola mundo");
    assert_eq!(transcript[1].text, "Hi there");

    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_empty_turn_produces_no_entries() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);
    let mut notices = conversation.take_notices().unwrap();

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    // A turn with no transcription at all, then a real one
    event_tx.send(LiveEvent::TurnComplete)?;
    event_tx.send(LiveEvent::InputTranscript { text: "ok".to_string() })?;
    event_tx.send(LiveEvent::TurnComplete)?;

    // The first notice is already the real turn; the empty one was silent
    let notice = next_notice(&mut notices).await;
    let SessionNotice::Transcript(entry) = notice else {
        panic!("expected transcript notice, got {:?}", notice);
    };
    assert_eq!(entry.text, "ok");
    assert_eq!(conversation.transcript().len(), 1);

    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_reply_chunks_schedule_back_to_back() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    event_tx.send(LiveEvent::Audio { blob: reply_blob(2400) })?;
    event_tx.send(LiveEvent::Audio { blob: reply_blob(1200) })?;
    wait_until(|| conversation.playback().in_flight() == 2).await;

    // Second chunk is scheduled exactly where the first ends
    assert_eq!(conversation.playback().cursor(), 3600); // 2400 + 1200

    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_interrupt_cancels_scheduled_replies() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    event_tx.send(LiveEvent::Audio { blob: reply_blob(24000) })?;
    wait_until(|| conversation.playback().in_flight() == 1).await;

    event_tx.send(LiveEvent::Interrupted)?;
    wait_until(|| conversation.playback().in_flight() == 0).await;

    // The next reply starts from the current playhead again
    assert_eq!(conversation.playback().cursor(), 0);

    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_malformed_reply_chunk_is_contained() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    event_tx.send(LiveEvent::Audio {
        blob: WireBlob {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: "!!!not-base64!!!".to_string(),
        },
    })?;

    // Session keeps running: a later turn still comes through
    event_tx.send(LiveEvent::InputTranscript { text: "still here".to_string() })?;
    event_tx.send(LiveEvent::TurnComplete)?;
    wait_until(|| conversation.transcript().len() == 1).await;

    assert_eq!(conversation.playback().in_flight(), 0); // bad chunk dropped
    assert_eq!(conversation.phase(), SessionPhase::Active);

    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_remote_close_ends_session() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);
    let mut notices = conversation.take_notices().unwrap();

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    event_tx.send(LiveEvent::Closed)?;

    let notice = next_notice(&mut notices).await;
    assert_eq!(
        notice,
        SessionNotice::Ended {
            reason: CloseReason::Remote
        }
    );
    wait_for_phase(&conversation, SessionPhase::Idle).await;

    // Teardown after a remote close is still fine
    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_remote_close_drains_queued_reply() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);
    let mut notices = conversation.take_notices().unwrap();

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    event_tx.send(LiveEvent::Audio { blob: reply_blob(2400) })?;
    wait_until(|| conversation.playback().in_flight() == 1).await;

    event_tx.send(LiveEvent::Closed)?;

    // The queued tail keeps playing through a clean close; rendering it out
    // lets shutdown finish without waiting for the drain budget
    let mut out = vec![0.0f32; 2400];
    conversation.playback().render(&mut out);
    assert!(out.iter().any(|&s| s != 0.0)); // reply audio, not silence

    let notice = next_notice(&mut notices).await;
    assert_eq!(
        notice,
        SessionNotice::Ended {
            reason: CloseReason::Remote
        }
    );
    assert_eq!(conversation.playback().in_flight(), 0);

    conversation.end().await?;
    Ok(())
}

#[tokio::test]
async fn test_end_is_idempotent() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);
    let mut notices = conversation.take_notices().unwrap();

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    conversation.end().await?;
    conversation.end().await?;
    conversation.end().await?;

    assert_eq!(conversation.phase(), SessionPhase::Idle);

    // Exactly one Ended notice regardless of how many times end ran
    let mut ended = 0;
    while let Ok(Some(notice)) =
        tokio::time::timeout(Duration::from_millis(100), notices.recv()).await
    {
        if matches!(notice, SessionNotice::Ended { .. }) {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);

    Ok(())
}

#[tokio::test]
async fn test_end_before_start_is_a_no_op() -> Result<()> {
    let (_event_tx, event_rx) = mpsc::unbounded_channel::<LiveEvent>();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);

    conversation.end().await?;
    assert_eq!(conversation.phase(), SessionPhase::Idle);

    Ok(())
}

#[tokio::test]
async fn test_end_while_connecting_cancels_cleanly() -> Result<()> {
    // The service never acknowledges setup
    let (_event_tx, event_rx) = mpsc::unbounded_channel::<LiveEvent>();
    let connector = FakeConnector::single(event_rx);
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);
    let mut notices = conversation.take_notices().unwrap();

    conversation.start().await?;
    assert_eq!(conversation.phase(), SessionPhase::Connecting);

    conversation.end().await?;

    let notice = next_notice(&mut notices).await;
    assert_eq!(
        notice,
        SessionNotice::Ended {
            reason: CloseReason::Local
        }
    );
    assert_eq!(conversation.phase(), SessionPhase::Idle);

    Ok(())
}

#[tokio::test]
async fn test_end_during_connect_abandons_the_attempt() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (open_tx, connector) = GatedConnector::new(event_rx);
    let (mic_started, capture) = TrackedCapture::pair();
    let conversation = Arc::new(Conversation::new(
        test_config(),
        connector,
        capture,
        Box::new(NullPlayback::new()),
    ));
    let mut notices = conversation.take_notices().unwrap();

    let starter = {
        let conversation = Arc::clone(&conversation);
        tokio::spawn(async move { conversation.start().await })
    };
    wait_for_phase(&conversation, SessionPhase::Connecting).await;

    // The host gives up while the connect is still in flight
    conversation.end().await?;

    // The connect settles afterwards and the service even acknowledges setup
    let _ = open_tx.send(());
    let _ = event_tx.send(LiveEvent::Opened);

    starter.await??;
    wait_for_phase(&conversation, SessionPhase::Idle).await;

    let notice = next_notice(&mut notices).await;
    assert_eq!(
        notice,
        SessionNotice::Ended {
            reason: CloseReason::Local
        }
    );
    assert!(!mic_started.load(Ordering::SeqCst)); // microphone never opened

    Ok(())
}

#[tokio::test]
async fn test_connect_failure_surfaces_error() -> Result<()> {
    let (_mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(Arc::new(FailingConnector), capture);
    let mut notices = conversation.take_notices().unwrap();

    let err = conversation.start().await.unwrap_err();
    assert!(matches!(err, LingoError::ConnectFailure(_)));
    assert_eq!(conversation.phase(), SessionPhase::Failed);

    let notice = next_notice(&mut notices).await;
    let SessionNotice::Error { message } = notice else {
        panic!("expected error notice, got {:?}", notice);
    };
    assert!(message.contains("dns lookup failed"));

    Ok(())
}

#[tokio::test]
async fn test_capture_failure_fails_session() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let conversation = conversation(connector, Box::new(DeniedCapture));
    let mut notices = conversation.take_notices().unwrap();

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;

    wait_for_phase(&conversation, SessionPhase::Failed).await;

    let notice = next_notice(&mut notices).await;
    let SessionNotice::Error { message } = notice else {
        panic!("expected error notice, got {:?}", notice);
    };
    assert!(message.contains("microphone blocked"));

    Ok(())
}

#[tokio::test]
async fn test_mic_stream_death_fails_session() -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connector = FakeConnector::single(event_rx);
    let (mic_tx, capture) = ChannelCapture::pair();
    let conversation = conversation(connector, capture);

    conversation.start().await?;
    event_tx.send(LiveEvent::Opened)?;
    wait_for_phase(&conversation, SessionPhase::Active).await;

    drop(mic_tx);

    wait_for_phase(&conversation, SessionPhase::Failed).await;
    Ok(())
}

#[tokio::test]
async fn test_sessions_do_not_leak_state() -> Result<()> {
    let (event_tx_a, event_rx_a) = mpsc::unbounded_channel();
    let (event_tx_b, event_rx_b) = mpsc::unbounded_channel();
    let connector = FakeConnector::new(vec![event_rx_a, event_rx_b]);

    // First conversation completes one turn and ends
    let (_mic_a, capture_a) = ChannelCapture::pair();
    let first = conversation(connector.clone(), capture_a);
    first.start().await?;
    event_tx_a.send(LiveEvent::Opened)?;
    wait_for_phase(&first, SessionPhase::Active).await;
    event_tx_a.send(LiveEvent::InputTranscript { text: "uno".to_string() })?;
    event_tx_a.send(LiveEvent::TurnComplete)?;
    event_tx_a.send(LiveEvent::Audio { blob: reply_blob(2400) })?;
    wait_until(|| first.transcript().len() == 1).await;
    first.end().await?;

    // Second conversation starts clean
    let (_mic_b, capture_b) = ChannelCapture::pair();
    let second = conversation(connector.clone(), capture_b);
    second.start().await?;
    event_tx_b.send(LiveEvent::Opened)?;
    wait_for_phase(&second, SessionPhase::Active).await;

    assert!(second.transcript().is_empty());
    assert_eq!(second.playback().cursor(), 0);
    assert_eq!(second.playback().in_flight(), 0);

    event_tx_b.send(LiveEvent::OutputTranscript { text: "dos".to_string() })?;
    event_tx_b.send(LiveEvent::TurnComplete)?;
    wait_until(|| second.transcript().len() == 1).await;

    assert_eq!(second.transcript()[0].text, "dos");
    assert_eq!(first.transcript()[0].text, "uno"); // untouched by the second run

    second.end().await?;
    Ok(())
}
