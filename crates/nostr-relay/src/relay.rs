use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nostr_sdk::prelude::*;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::message::{ClientMessage, RelayMessage};
use crate::subscription::{ActiveSubscription, SubscriptionMode, SubscriptionRequest};
use crate::util::validate_relay_url;
use crate::RelayError;

/// Default deadline for [`RelayClient::publish`] callers without their own.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_LOGGED_FRAME_CHARS: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Connecting,
    Open,
    /// Socket gone, waiting out the reconnect pause.
    Closed,
    Disposed,
}

/// A client for one relay endpoint that keeps its subscriptions and
/// unacknowledged publishes alive across reconnects.
///
/// The socket lives in a background task spawned by [`RelayClient::new`];
/// dropping the client disposes it.
pub struct RelayClient {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    state: Mutex<RelayState>,
    shutdown: watch::Sender<bool>,
    reconnect: Notify,
    next_publish: AtomicU64,
}

struct PendingPublish {
    // Identifies the publish call that owns the entry when the same event is
    // published more than once.
    token: u64,
    event: Event,
    reply: oneshot::Sender<Result<(), RelayError>>,
}

struct RelayState {
    status: RelayStatus,
    outbound: Option<mpsc::UnboundedSender<String>>,
    subscriptions: HashMap<String, ActiveSubscription>,
    publishing: HashMap<String, PendingPublish>,
}

impl RelayState {
    fn is_open(&self) -> bool {
        self.status == RelayStatus::Open && self.outbound.is_some()
    }

    fn send(&self, frame: String) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(frame);
        }
    }

    /// Everything that has to go out again on a fresh socket: unacknowledged
    /// events first, then every registered subscription with its cursor.
    fn replay_frames(&self) -> Vec<String> {
        let events = self
            .publishing
            .values()
            .map(|pending| {
                ClientMessage::Event(&pending.event)
                    .as_json()
                    .map_err(RelayError::from)
            });
        let reqs = self.subscriptions.values().map(|sub| req_frame(&sub.request));
        events
            .chain(reqs)
            .filter_map(|frame| match frame {
                Ok(frame) => Some(frame),
                Err(err) => {
                    warn!(error = %err, "Failed to encode replay frame");
                    None
                }
            })
            .collect()
    }
}

impl RelayClient {
    /// Creates the client and starts connecting in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(url: impl Into<String>, config: RelayConfig) -> Result<Self, RelayError> {
        let url = url.into();
        validate_relay_url(&url)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            url,
            state: Mutex::new(RelayState {
                status: RelayStatus::Connecting,
                outbound: None,
                subscriptions: HashMap::new(),
                publishing: HashMap::new(),
            }),
            shutdown,
            reconnect: Notify::new(),
            next_publish: AtomicU64::new(0),
        });

        tokio::spawn(run_connection(inner.clone(), config, shutdown_rx));
        Ok(Self { inner })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn status(&self) -> RelayStatus {
        self.inner.state().status
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().is_open()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.state().subscriptions.len()
    }

    pub fn has_subscription(&self, id: &str) -> bool {
        self.inner.state().subscriptions.contains_key(id)
    }

    /// Current resumption cursor of a registered subscription.
    pub fn subscription_cursor(&self, id: &str) -> Option<Timestamp> {
        self.inner
            .state()
            .subscriptions
            .get(id)
            .and_then(|sub| sub.request.since)
    }

    pub fn pending_publish_count(&self) -> usize {
        self.inner.state().publishing.len()
    }

    /// Registers a subscription. The `REQ` goes out now if the socket is open,
    /// otherwise on the next successful connect.
    pub fn subscribe(&self, request: SubscriptionRequest) -> Result<(), RelayError> {
        request.validate()?;

        let mut state = self.inner.state();
        if state.status == RelayStatus::Disposed {
            return Err(RelayError::Disposed);
        }

        let frame = req_frame(&request)?;
        let id = request.id.clone();
        state
            .subscriptions
            .insert(id.clone(), ActiveSubscription::new(request));

        if state.is_open() {
            debug!(relay = %self.inner.url, subscription_id = %id, req = %frame, "Sending subscription");
            state.send(frame);
        } else {
            debug!(relay = %self.inner.url, subscription_id = %id, "Subscription waiting for relay connect");
        }
        Ok(())
    }

    pub fn unsubscribe(&self, id: &str) {
        let mut state = self.inner.state();
        if state.subscriptions.remove(id).is_none() {
            return;
        }
        if !state.is_open() {
            return;
        }
        match (ClientMessage::Close { subscription_id: id }).as_json() {
            Ok(frame) => {
                debug!(relay = %self.inner.url, subscription_id = %id, "Closing subscription");
                state.send(frame);
            }
            Err(err) => warn!(relay = %self.inner.url, error = %err, "Failed to encode CLOSE"),
        }
    }

    /// Publishes an event and waits for the relay's `OK`.
    ///
    /// Resolves on acceptance, fails with [`RelayError::Rejected`] when the
    /// relay refuses the event and with [`RelayError::Timeout`] once `timeout`
    /// elapses. The pending entry is gone in every case.
    pub async fn publish(&self, event: Event, timeout: Duration) -> Result<(), RelayError> {
        let event_id = event.id.to_hex();
        let (reply, outcome) = oneshot::channel();
        let token = self.inner.next_publish.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;

        {
            let mut state = self.inner.state();
            if state.status == RelayStatus::Disposed {
                return Err(RelayError::Disposed);
            }
            let frame = ClientMessage::Event(&event).as_json()?;
            if state.is_open() {
                debug!(relay = %self.inner.url, event_id = %event_id, "Publishing event");
                state.send(frame);
            } else {
                debug!(relay = %self.inner.url, event_id = %event_id, "Publish waiting for relay connect");
            }
            state
                .publishing
                .insert(event_id.clone(), PendingPublish { token, event, reply });
        }

        match tokio::time::timeout_at(deadline, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Entry dropped without an answer (client disposed): the caller
                // still only hears back through the deadline.
                tokio::time::sleep_until(deadline).await;
                Err(RelayError::Timeout)
            }
            Err(_) => {
                let mut state = self.inner.state();
                if state
                    .publishing
                    .get(&event_id)
                    .is_some_and(|pending| pending.token == token)
                {
                    state.publishing.remove(&event_id);
                }
                drop(state);
                warn!(relay = %self.inner.url, event_id = %event_id, "Publish timeout");
                Err(RelayError::Timeout)
            }
        }
    }

    /// Drops the current socket so the connection loop reconnects and replays.
    pub fn reconnect(&self) {
        if self.inner.state().is_open() {
            info!(relay = %self.inner.url, "Forcing relay reconnect");
            self.inner.reconnect.notify_one();
        }
    }

    /// Stops the connection loop and forgets every subscription and pending
    /// publish without calling back into them.
    pub fn dispose(&self) {
        {
            let mut state = self.inner.state();
            if state.status == RelayStatus::Disposed {
                return;
            }
            state.status = RelayStatus::Disposed;
            state.outbound = None;
            state.subscriptions.clear();
            state.publishing.clear();
        }
        let _ = self.inner.shutdown.send(true);
        debug!(relay = %self.inner.url, "Relay client disposed");
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &self.inner.url)
            .field("status", &self.status())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_disposed(&self) -> bool {
        self.state().status == RelayStatus::Disposed
    }

    fn set_connecting(&self) -> bool {
        let mut state = self.state();
        if state.status == RelayStatus::Disposed {
            return false;
        }
        state.status = RelayStatus::Connecting;
        true
    }

    /// Switches to `Open` and queues the replay under the same lock, so a
    /// concurrent `subscribe` either lands in the replay or sends on its own,
    /// never both.
    fn open(&self, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut state = self.state();
        if state.status == RelayStatus::Disposed {
            return false;
        }
        info!(
            relay = %self.url,
            subscriptions = state.subscriptions.len(),
            publishing = state.publishing.len(),
            "Relay connection open"
        );
        for frame in state.replay_frames() {
            let _ = outbound.send(frame);
        }
        state.status = RelayStatus::Open;
        state.outbound = Some(outbound);
        true
    }

    fn mark_closed(&self) -> bool {
        let mut state = self.state();
        state.outbound = None;
        if state.status == RelayStatus::Disposed {
            return false;
        }
        state.status = RelayStatus::Closed;
        true
    }

    fn handle_text(&self, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(relay = %self.url, error = %err, frame = %truncate(text), "Bad relay message");
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => self.handle_event(&subscription_id, event),
            RelayMessage::EndOfStoredEvents { subscription_id } => {
                self.handle_eose(&subscription_id)
            }
            RelayMessage::Notice { message } => {
                info!(relay = %self.url, notice = %message, "Relay notice");
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => self.handle_closed(&subscription_id, &message),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => self.handle_ok(&event_id, accepted, message),
        }
    }

    fn handle_event(&self, subscription_id: &str, raw: Value) {
        // Events for cancelled subscriptions are still in flight after CLOSE.
        if !self.state().subscriptions.contains_key(subscription_id) {
            return;
        }

        let event: Event = match serde_json::from_value(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(relay = %self.url, subscription_id, error = %err, "Bad event");
                return;
            }
        };
        if let Err(err) = event.verify() {
            warn!(relay = %self.url, subscription_id, event_id = %event.id, error = %err, "Invalid event");
            return;
        }

        let callback = {
            let mut state = self.state();
            let Some(sub) = state.subscriptions.get_mut(subscription_id) else {
                return;
            };
            if !sub.accept(&event) {
                debug!(relay = %self.url, subscription_id, event_id = %event.id, "Skipping redelivered event");
                return;
            }
            sub.request.event_callback()
        };

        if let Some(callback) = callback {
            callback(&event);
        }
    }

    fn handle_eose(&self, subscription_id: &str) {
        let (callback, events) = {
            let mut state = self.state();
            let Some(sub) = state.subscriptions.get(subscription_id) else {
                return;
            };
            let callback = sub.request.eose_callback();
            let events = sub.events.clone();
            if sub.request.mode == SubscriptionMode::Fetch {
                state.subscriptions.remove(subscription_id);
            }
            (callback, events)
        };

        debug!(relay = %self.url, subscription_id, events = events.len(), "End of stored events");
        if let Some(callback) = callback {
            callback(&events);
        }
    }

    fn handle_closed(&self, subscription_id: &str, message: &str) {
        warn!(relay = %self.url, subscription_id, reason = %message, "Subscription closed by relay");
        // Dropped for good: CLOSED usually means auth-required, which this
        // client does not negotiate.
        let Some(sub) = self.state().subscriptions.remove(subscription_id) else {
            return;
        };
        if let Some(callback) = sub.request.closed_callback() {
            callback(message);
        }
    }

    fn handle_ok(&self, event_id: &str, accepted: bool, message: String) {
        let Some(pending) = self.state().publishing.remove(event_id) else {
            return;
        };
        info!(relay = %self.url, event_id, accepted, message = %message, "Publish result");
        let result = if accepted {
            Ok(())
        } else {
            Err(RelayError::Rejected { message })
        };
        let _ = pending.reply.send(result);
    }
}

fn req_frame(request: &SubscriptionRequest) -> Result<String, RelayError> {
    let filter = request.effective_filter();
    Ok(ClientMessage::Req {
        subscription_id: &request.id,
        filter: &filter,
    }
    .as_json()?)
}

async fn run_connection(inner: Arc<Inner>, config: RelayConfig, mut shutdown: watch::Receiver<bool>) {
    loop {
        if !inner.set_connecting() {
            break;
        }
        info!(relay = %inner.url, "Connecting to relay");

        let connect = tokio::time::timeout(config.connect_timeout, connect_async(inner.url.as_str()));
        let outcome = tokio::select! {
            _ = shutdown.changed() => break,
            outcome = connect => outcome,
        };

        match outcome {
            Ok(Ok((socket, _response))) => run_session(&inner, socket, &mut shutdown).await,
            Ok(Err(err)) => warn!(relay = %inner.url, error = %err, "Relay connect failed"),
            Err(_) => warn!(relay = %inner.url, "Relay connect timed out"),
        }

        if !inner.mark_closed() {
            break;
        }
        info!(relay = %inner.url, pause_ms = config.reconnect_pause.as_millis() as u64, "Relay closed, reconnecting");

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.reconnect_pause) => {}
        }
    }
    debug!(relay = %inner.url, "Relay connection task stopped");
}

async fn run_session(inner: &Arc<Inner>, socket: Socket, shutdown: &mut watch::Receiver<bool>) {
    let (mut sink, mut source) = socket.split();
    let (outbound, mut frames) = mpsc::unbounded_channel::<String>();

    if !inner.open(outbound) {
        let _ = sink.close().await;
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                break;
            }
            _ = inner.reconnect.notified() => {
                let _ = sink.close().await;
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = sink.send(Message::Text(frame)).await {
                        warn!(relay = %inner.url, error = %err, "Relay send failed");
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => inner.handle_text(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => inner.handle_text(&text),
                    Err(_) => warn!(relay = %inner.url, "Ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(relay = %inner.url, frame = ?frame, "Relay sent close");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(relay = %inner.url, error = %err, "Relay socket error");
                    break;
                }
                None => break,
            },
        }
    }

    if inner.is_disposed() {
        debug!(relay = %inner.url, "Relay session ended after dispose");
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_LOGGED_FRAME_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
