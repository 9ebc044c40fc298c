//! Mock AI Realtime WebSocket Server
//!
//! Accepts connections the way the real AI realtime service does, records
//! every client event as parsed JSON and lets tests script server events
//! per connection. Dropping a [`MockAiConnection`] closes its socket, which
//! is how tests simulate AI-side connection loss.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How long [`MockAiConnection::expect_event`] waits before giving up.
const EXPECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Mock AI realtime service listening on a random local port.
pub struct MockAiServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    connections: mpsc::UnboundedReceiver<MockAiConnection>,
    accept_task: JoinHandle<()>,
}

impl MockAiServer {
    /// Bind a random port and start accepting connections.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock AI server");
        let addr = listener.local_addr().expect("Mock AI server has no address");

        let accepted = Arc::new(AtomicUsize::new(0));
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let task_accepted = accepted.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                task_accepted.fetch_add(1, Ordering::SeqCst);

                let (event_tx, event_rx) = mpsc::unbounded_channel();
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let _ = conn_tx.send(MockAiConnection {
                    events: event_rx,
                    outbound: out_tx,
                });
                tokio::spawn(async move {
                    if let Err(e) = drive_connection(stream, event_tx, out_rx).await {
                        eprintln!("Mock AI connection error: {e}");
                    }
                });
            }
        });

        MockAiServer {
            addr,
            accepted,
            connections: conn_rx,
            accept_task,
        }
    }

    /// WebSocket URL clients should dial.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted since start.
    pub fn connection_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    pub async fn next_connection(&mut self) -> MockAiConnection {
        timeout(EXPECT_TIMEOUT, self.connections.recv())
            .await
            .expect("Timed out waiting for an AI connection")
            .expect("Mock AI server accept loop is gone")
    }
}

impl Drop for MockAiServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// One accepted connection. The test side of the socket.
pub struct MockAiConnection {
    events: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl MockAiConnection {
    /// Next client event as parsed JSON, `None` once the client went away.
    pub async fn next_event(&mut self) -> Option<Value> {
        self.events.recv().await
    }

    /// Wait for the next client event of the given `type`, skipping others.
    /// Panics after a few seconds so a missing event fails the test instead
    /// of hanging it.
    pub async fn expect_event(&mut self, kind: &str) -> Value {
        let deadline = tokio::time::Instant::now() + EXPECT_TIMEOUT;
        loop {
            let event = timeout(deadline - tokio::time::Instant::now(), self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("Timed out waiting for `{kind}` event"))
                .unwrap_or_else(|| panic!("Client closed before sending `{kind}`"));
            if event.get("type").and_then(Value::as_str) == Some(kind) {
                return event;
            }
        }
    }

    /// Assert that no client event of the given `type` arrives within `wait`.
    pub async fn expect_no_event(&mut self, kind: &str, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline - tokio::time::Instant::now();
            match timeout(remaining, self.events.recv()).await {
                Err(_) => return,
                Ok(None) => return,
                Ok(Some(event)) => {
                    if event.get("type").and_then(Value::as_str) == Some(kind) {
                        panic!("Unexpected `{kind}` event: {event}");
                    }
                }
            }
        }
    }

    /// Push one server event down the socket.
    pub fn send_json(&self, value: Value) {
        let _ = self.outbound.send(Message::Text(value.to_string().into()));
    }

    /// Push a raw text frame, valid JSON or not.
    pub fn send_raw(&self, text: &str) {
        let _ = self.outbound.send(Message::Text(text.to_string().into()));
    }
}

/// Pump one accepted socket: inbound text frames become parsed events,
/// scripted messages flow out. Ends when either side closes; dropping the
/// test's [`MockAiConnection`] closes the socket from the server side.
async fn drive_connection(
    stream: TcpStream,
    events: mpsc::UnboundedSender<Value>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        // The test may have stopped listening; the socket
                        // stays up regardless.
                        let _ = events.send(value);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            scripted = outbound.recv() => match scripted {
                Some(message) => write.send(message).await?,
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    Ok(())
}
