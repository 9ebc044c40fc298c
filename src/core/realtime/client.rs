//! AI realtime transport client.
//!
//! Maintains the outbound WebSocket session to the AI realtime service for
//! one call. The transport is deliberately thin: it serializes client events
//! from an internal queue, decodes every inbound frame and forwards the
//! outcome to the owning bridge through an event channel. What an event
//! means mid-call is the bridge's business, not the transport's.
//!
//! # Connection lifetime
//!
//! Loss of this connection ends the session. There is no reconnect loop
//! here: the caller's audio context lives server-side in the AI session and
//! cannot be rebuilt, so the bridge treats a transport closure as terminal
//! and tears the call down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::messages::{AiSessionConfig, ClientEvent, ServerEvent, decode_ai_event};
use crate::core::protocol::ProtocolError;

/// Default AI realtime WebSocket endpoint.
pub const DEFAULT_AI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default realtime model requested when the agent config names none.
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-realtime-preview";

/// Capacity of the outbound client-event queue.
const WS_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Errors
// =============================================================================

/// Transport-level failures on the AI leg.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("AI endpoint URL invalid: {0}")]
    InvalidUrl(String),

    #[error("AI connection failed: {0}")]
    ConnectFailed(String),

    #[error("AI connection is not open")]
    NotConnected,

    #[error("outbound AI queue is full")]
    QueueFull,
}

pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Configuration
// =============================================================================

/// Connection parameters for the AI realtime service.
#[derive(Debug, Clone)]
pub struct AiClientConfig {
    /// Base WebSocket URL, without the model query parameter
    pub url: String,
    pub api_key: String,
    pub model: String,
}

impl AiClientConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        AiClientConfig {
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Full endpoint with the model selector appended.
    pub fn endpoint(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

// =============================================================================
// Transport events
// =============================================================================

/// What the transport reports to its owning bridge.
#[derive(Debug)]
pub enum AiTransportEvent {
    /// A decoded server event.
    Event(ServerEvent),
    /// An inbound frame that failed to decode. The connection stays up.
    DecodeError(ProtocolError),
    /// The connection ended for any reason other than a local `close()`.
    Closed { reason: String },
}

// =============================================================================
// Client
// =============================================================================

/// Handle to one live AI realtime connection.
///
/// Cheap to share behind the bridge actor; the socket itself lives in a
/// spawned task that exits when either side closes.
pub struct AiRealtimeClient {
    sender: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    connected: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AiRealtimeClient {
    /// Connect, send the initial session configuration and start the socket
    /// task. Decoded traffic flows into `events` until the connection ends.
    pub async fn connect(
        config: &AiClientConfig,
        session: AiSessionConfig,
        events: mpsc::Sender<AiTransportEvent>,
    ) -> TransportResult<Self> {
        let endpoint = config.endpoint();
        let host = host_header(&endpoint)?;

        let request = http::Request::builder()
            .uri(&endpoint)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::info!(model = %config.model, "Connected to AI realtime service");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);

        let connected = Arc::new(AtomicBool::new(true));
        let intentional_disconnect = Arc::new(AtomicBool::new(false));

        let task_connected = connected.clone();
        let task_intentional = intentional_disconnect.clone();

        let handle = tokio::spawn(async move {
            let mut close_reason = String::from("stream ended");

            loop {
                tokio::select! {
                    outbound = rx.recv() => {
                        let Some(event) = outbound else {
                            close_reason = "local close".to_string();
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to serialize client event");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            close_reason = format!("send failed: {e}");
                            break;
                        }
                    }

                    inbound = ws_source.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                let report = match decode_ai_event(&text) {
                                    Ok(event) => AiTransportEvent::Event(event),
                                    Err(e) => AiTransportEvent::DecodeError(e),
                                };
                                if events.send(report).await.is_err() {
                                    // Bridge is gone; nothing left to report to.
                                    close_reason = "bridge dropped".to_string();
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    close_reason = format!("pong failed: {e}");
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                close_reason = match frame {
                                    Some(f) => format!("closed by peer: {} {}", f.code, f.reason),
                                    None => "closed by peer".to_string(),
                                };
                                break;
                            }
                            Some(Err(e)) => {
                                close_reason = format!("stream error: {e}");
                                break;
                            }
                            Some(Ok(_)) => {}
                            None => break,
                        }
                    }
                }
            }

            task_connected.store(false, Ordering::SeqCst);

            if task_intentional.load(Ordering::SeqCst) {
                tracing::debug!("AI connection closed locally");
            } else {
                tracing::warn!(reason = %close_reason, "AI connection lost");
                let _ = events
                    .send(AiTransportEvent::Closed {
                        reason: close_reason,
                    })
                    .await;
            }
        });

        let client = AiRealtimeClient {
            sender: Mutex::new(Some(tx)),
            connected,
            intentional_disconnect,
            task: Mutex::new(Some(handle)),
        };

        // First event on the wire configures the session.
        client.send(ClientEvent::SessionUpdate { session }).await?;

        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue an event without waiting. Used on the audio path where falling
    /// behind must never stall the caller's socket.
    pub fn try_send(&self, event: ClientEvent) -> TransportResult<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(TransportError::NotConnected)?;
        sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected,
        })
    }

    /// Queue an event, waiting for capacity. Used on the control path where
    /// delivery matters more than latency.
    pub async fn send(&self, event: ClientEvent) -> TransportResult<()> {
        let sender = {
            let guard = self.sender.lock();
            guard.as_ref().cloned()
        };
        let sender = sender.ok_or(TransportError::NotConnected)?;
        sender
            .send(event)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Close the connection. Safe to call more than once; after the first
    /// call the socket task stops without reporting a loss.
    pub fn close(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        *self.sender.lock() = None;
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for AiRealtimeClient {
    fn drop(&mut self) {
        if self.connected.load(Ordering::SeqCst) {
            self.close();
        }
    }
}

/// Host header value for the endpoint, including any non-default port.
fn host_header(endpoint: &str) -> TransportResult<String> {
    let parsed =
        url::Url::parse(endpoint).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl(format!("no host in `{endpoint}`")))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_model() {
        let config =
            AiClientConfig::new(DEFAULT_AI_REALTIME_URL, "sk-test", "gpt-4o-realtime-preview");
        assert_eq!(
            config.endpoint(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_host_header_default_port() {
        let host = host_header("wss://api.openai.com/v1/realtime?model=m").unwrap();
        assert_eq!(host, "api.openai.com");
    }

    #[test]
    fn test_host_header_explicit_port() {
        let host = host_header("ws://127.0.0.1:9021/?model=m").unwrap();
        assert_eq!(host, "127.0.0.1:9021");
    }

    #[test]
    fn test_host_header_rejects_garbage() {
        assert!(host_header("not a url").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        let config = AiClientConfig::new("ws://127.0.0.1:1", "sk-test", "m");
        let (tx, _rx) = mpsc::channel(8);
        let result = AiRealtimeClient::connect(&config, AiSessionConfig::default(), tx).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
