// WebSocket client for the live conversation service.
//
// `GeminiConnector::connect` opens the socket, sends the one-time setup
// message and spawns a reader task that maps wire messages onto
// `LiveEvent`s. The session layer talks to the trait objects only, so tests
// can substitute a scripted connection.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::audio::codec::WireBlob;
use crate::error::{LingoError, Result};
use crate::live::events::LiveEvent;
use crate::live::protocol::{ClientMessage, RealtimeInput, ServerMessage, Setup};

/// Default live service endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Everything needed to open one conversation session
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// Factory for live service connections
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a connection and send the setup message. The service confirms
    /// with `LiveEvent::Opened` on the event stream.
    async fn connect(&self, setup: &SessionSetup) -> Result<Box<dyn LiveConnection>>;
}

/// An open bidirectional session with the service
#[async_trait::async_trait]
pub trait LiveConnection: Send {
    /// Send one encoded audio frame upstream
    async fn send_audio(&mut self, blob: WireBlob) -> Result<()>;

    /// Take the inbound event stream; `None` after the first call
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LiveEvent>>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Connector for the hosted live service
pub struct GeminiConnector {
    endpoint: String,
    api_key: String,
}

impl GeminiConnector {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<Box<dyn LiveConnection>> {
        // The key rides in the query string; never log the full URL
        let url = format!("{}?key={}", self.endpoint, self.api_key);

        info!("Connecting to live service at {}", self.endpoint);

        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| LingoError::ConnectFailure(e.to_string()))?;
        let (mut write, read) = ws.split();

        let message = ClientMessage::Setup(Setup::new(
            &setup.model,
            &setup.voice,
            &setup.system_instruction,
        ));
        let json = serde_json::to_string(&message)
            .map_err(|e| LingoError::ConnectFailure(format!("failed to encode setup: {}", e)))?;
        write
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| LingoError::ConnectFailure(format!("failed to send setup: {}", e)))?;

        info!("Live session setup sent (model={})", setup.model);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read, event_tx));

        Ok(Box::new(GeminiConnection {
            write,
            events: Some(event_rx),
            reader,
            closed: false,
        }))
    }
}

/// Reader task: forward wire messages as events until the socket closes.
///
/// The service may deliver JSON in either text or binary frames.
async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::UnboundedSender<LiveEvent>) {
    while let Some(result) = read.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                if !dispatch(&text, &tx) {
                    return;
                }
            }
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if !dispatch(&text, &tx) {
                        return;
                    }
                }
                Err(_) => warn!("Ignoring non-UTF8 binary frame from live service"),
            },
            Ok(WsMessage::Close(_)) => {
                info!("Live service closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(LiveEvent::Error {
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    let _ = tx.send(LiveEvent::Closed);
}

/// Parse one wire message and emit its events. Returns false once the
/// receiver is gone.
fn dispatch(text: &str, tx: &mpsc::UnboundedSender<LiveEvent>) -> bool {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring malformed live message: {}", e);
            return true;
        }
    };

    for event in message.into_events() {
        if tx.send(event).is_err() {
            return false;
        }
    }
    true
}

pub struct GeminiConnection {
    write: WsSink,
    events: Option<mpsc::UnboundedReceiver<LiveEvent>>,
    reader: tokio::task::JoinHandle<()>,
    closed: bool,
}

#[async_trait::async_trait]
impl LiveConnection for GeminiConnection {
    async fn send_audio(&mut self, blob: WireBlob) -> Result<()> {
        let message = ClientMessage::RealtimeInput(RealtimeInput::audio(blob));
        let json = serde_json::to_string(&message)
            .map_err(|e| LingoError::Session(format!("failed to encode audio message: {}", e)))?;

        self.write
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| LingoError::Session(format!("connection lost: {}", e)))
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LiveEvent>> {
        self.events.take()
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        info!("Closing live connection");
        let _ = self.write.send(WsMessage::Close(None)).await;
        self.reader.abort();
        Ok(())
    }
}

impl Drop for GeminiConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
