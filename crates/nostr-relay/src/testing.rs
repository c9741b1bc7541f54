//! In-process websocket relay for scripting relay behaviour in tests.
//!
//! ```rust,ignore
//! let mut relay = MockRelay::start().await?;
//! let client = RelayClient::new(relay.url(), RelayConfig::default())?;
//! let req = relay.next_frame().await.unwrap();
//! relay.send_eose(req[1].as_str().unwrap());
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nostr_sdk::prelude::*;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::RelayError;

/// How long [`MockRelay::next_frame`] waits before giving up.
pub const FRAME_WAIT: Duration = Duration::from_secs(5);

/// A single-endpoint relay on `127.0.0.1` that records every frame clients
/// send and lets the test push arbitrary frames back over the most recent
/// connection.
pub struct MockRelay {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Value>,
    shared: Arc<Shared>,
}

struct Shared {
    current: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connections: watch::Sender<usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn current(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}

impl MockRelay {
    pub async fn start() -> Result<Self, RelayError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (connections, _) = watch::channel(0usize);
        let shared = Arc::new(Shared {
            current: Mutex::new(None),
            connections,
            tasks: Mutex::new(Vec::new()),
        });

        let accept_shared = shared.clone();
        let accept = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "Mock relay accept failed");
                        continue;
                    }
                };
                debug!(peer = %peer, "Mock relay accepted connection");
                let task = tokio::spawn(serve_connection(
                    stream,
                    accept_shared.clone(),
                    frames_tx.clone(),
                ));
                accept_shared.track(task);
            }
        });
        shared.track(accept);

        Ok(Self {
            addr,
            frames,
            shared,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of websocket connections accepted so far.
    pub fn connections(&self) -> usize {
        *self.shared.connections.borrow()
    }

    /// Waits until at least `count` connections have been accepted.
    pub async fn wait_for_connections(&self, count: usize) -> bool {
        let mut rx = self.shared.connections.subscribe();
        let reached = tokio::time::timeout(FRAME_WAIT, rx.wait_for(|seen| *seen >= count))
            .await
            .map_or(false, |seen| seen.is_ok());
        reached
    }

    /// Next frame any client sent, parsed as JSON. `None` after [`FRAME_WAIT`].
    pub async fn next_frame(&mut self) -> Option<Value> {
        self.next_frame_within(FRAME_WAIT).await
    }

    pub async fn next_frame_within(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skips frames until one whose first element is `kind` (`"REQ"`, `"EVENT"`, ...).
    pub async fn next_frame_of(&mut self, kind: &str) -> Option<Value> {
        loop {
            let frame = self.next_frame().await?;
            if frame[0] == kind {
                return Some(frame);
            }
        }
    }

    /// Sends a raw text frame on the latest connection. False when no client
    /// is connected.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        match self.shared.current().as_ref() {
            Some(tx) => tx.send(Message::Text(text.into())).is_ok(),
            None => false,
        }
    }

    pub fn send(&self, frame: Value) -> bool {
        self.send_text(frame.to_string())
    }

    pub fn send_event(&self, subscription_id: &str, event: &Event) -> bool {
        self.send(json!(["EVENT", subscription_id, event]))
    }

    pub fn send_eose(&self, subscription_id: &str) -> bool {
        self.send(json!(["EOSE", subscription_id]))
    }

    pub fn send_ok(&self, event_id: &str, accepted: bool, message: &str) -> bool {
        self.send(json!(["OK", event_id, accepted, message]))
    }

    pub fn send_closed(&self, subscription_id: &str, reason: &str) -> bool {
        self.send(json!(["CLOSED", subscription_id, reason]))
    }

    /// Closes the latest connection from the relay side.
    pub fn drop_connection(&self) {
        self.shared.current().take();
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        let tasks = std::mem::take(
            &mut *self
                .shared
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    frames: mpsc::UnboundedSender<Value>,
) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(error = %err, "Mock relay handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = socket.split();
    let (outbound, mut outgoing) = mpsc::unbounded_channel();
    *shared.current() = Some(outbound.clone());
    shared.connections.send_modify(|count| *count += 1);
    // Only the copy in `current` may keep the writer alive.
    drop(outbound);

    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(message) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => {
                        let _ = frames.send(value);
                    }
                    Err(err) => warn!(error = %err, "Mock relay got non-json frame"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Mock relay connection finished");
}
