//! Nostr relay transport: one reconnecting websocket per relay endpoint.
//!
//! [`RelayClient`] keeps its subscriptions and unacknowledged publishes in
//! memory and replays both whenever the socket comes back, so callers never
//! see a reconnect. Live subscriptions resume from the newest `created_at`
//! they have delivered.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      NOSTR-RELAY                          │
//! │                                                           │
//! │  fetch_latest ──┬──► RelayClient ──► wss://relay-a        │
//! │  (newest wins)  ├──► RelayClient ──► wss://relay-b        │
//! │                 └──► RelayClient ──► wss://relay-c        │
//! │                                                           │
//! │  RelayClient                                              │
//! │   - subscriptions: id -> request + cursor                 │
//! │   - publishing:    event id -> pending OK                 │
//! │   - task: Connecting -> Open -> Closed -> Connecting ...  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Wire frames
//!
//! | Direction | Frame |
//! |-----------|-------|
//! | out | `["REQ", id, filter]`, `["CLOSE", id]`, `["EVENT", event]` |
//! | in | `["EVENT", id, event]`, `["EOSE", id]`, `["NOTICE", text]`, `["CLOSED", id, reason]`, `["OK", id, accepted, message]` |
//!
//! # Example
//!
//! ```rust,ignore
//! use nostr_relay::{RelayClient, RelayConfig, SubscriptionRequest};
//! use nostr_sdk::prelude::*;
//!
//! let client = RelayClient::new("wss://relay.primal.net", RelayConfig::default())?;
//! client.subscribe(
//!     SubscriptionRequest::live(Filter::new().kind(Kind::TextNote))
//!         .on_event(|event| println!("{}", event.content)),
//! )?;
//! ```

pub mod aggregator;
mod config;
mod error;
mod message;
mod relay;
mod subscription;
pub mod testing;
mod util;

pub use aggregator::{fetch_latest, fetch_relay_list, KIND_RELAY_LIST};
pub use config::{parse_relays, AggregatorConfig, RelayConfig, OUTBOX_RELAYS};
pub use error::RelayError;
pub use message::{ClientMessage, RelayMessage};
pub use relay::{RelayClient, RelayStatus, DEFAULT_PUBLISH_TIMEOUT};
pub use subscription::{
    generate_subscription_id, ClosedCallback, EoseCallback, EventCallback, SubscriptionMode,
    SubscriptionRequest,
};
pub use util::{normalize_relay_url, tag_value, tag_values, unix_timestamp, validate_relay_url};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
