//! Newest-wins lookup of replaceable records across several relays.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use nostr_sdk::prelude::*;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::AggregatorConfig;
use crate::relay::RelayClient;
use crate::subscription::SubscriptionRequest;
use crate::util::{normalize_relay_url, tag_values};
use crate::RelayError;

pub const KIND_RELAY_LIST: u16 = 10002;

/// Asks every configured relay for the newest `kind` record by `author` and
/// returns the one with the greatest `created_at`.
///
/// Resolves once every relay has answered with EOSE or the config's deadline
/// passes, whichever comes first. Relays that never answer only cost the
/// deadline. `Ok(None)` means no relay had a matching record in time.
pub async fn fetch_latest(
    config: &AggregatorConfig,
    author: PublicKey,
    kind: Kind,
) -> Result<Option<Event>, RelayError> {
    let best: Arc<Mutex<Option<Event>>> = Arc::new(Mutex::new(None));
    let filter = Filter::new().kind(kind).author(author).limit(1);

    let mut lookups = Vec::with_capacity(config.relays.len());
    let mut last_error = None;
    for url in &config.relays {
        let client = match RelayClient::new(url.as_str(), config.relay.clone()) {
            Ok(client) => client,
            Err(err) => {
                warn!(relay = %url, error = %err, "Skipping relay");
                last_error = Some(err);
                continue;
            }
        };

        let (done, eose) = oneshot::channel::<()>();
        let done = Mutex::new(Some(done));
        let sink = best.clone();
        let request = SubscriptionRequest::fetch(filter.clone()).on_eose(move |events| {
            let newest = events
                .iter()
                .filter(|event| event.pubkey == author && event.kind == kind)
                .max_by_key(|event| event.created_at);
            if let Some(event) = newest {
                let mut best = sink.lock().unwrap_or_else(PoisonError::into_inner);
                if best.as_ref().map_or(true, |current| event.created_at > current.created_at) {
                    *best = Some(event.clone());
                }
            }
            if let Some(done) = done.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = done.send(());
            }
        });

        if let Err(err) = client.subscribe(request) {
            warn!(relay = %url, error = %err, "Fetch subscription failed");
            last_error = Some(err);
            continue;
        }

        // The client lives inside its lookup; dropping the lookup disposes it.
        lookups.push(async move {
            let answered = eose.await.is_ok();
            debug!(relay = %client.url(), answered, "Relay lookup finished");
            drop(client);
        });
    }

    if lookups.is_empty() {
        return match last_error {
            Some(err) => Err(err),
            None => Ok(None),
        };
    }

    let relays = lookups.len();
    if tokio::time::timeout(config.deadline, join_all(lookups))
        .await
        .is_err()
    {
        info!(
            relays,
            deadline_ms = config.deadline.as_millis() as u64,
            "Fetch deadline reached before every relay answered"
        );
    }

    let result = best.lock().unwrap_or_else(PoisonError::into_inner).take();
    debug!(
        kind = kind.as_u16(),
        found = result.is_some(),
        created_at = result.as_ref().map(|event| event.created_at.as_secs()),
        "Fetch latest finished"
    );
    Ok(result)
}

/// Latest relay list (kind 10002) of `author`, as normalized `r` entries.
pub async fn fetch_relay_list(
    config: &AggregatorConfig,
    author: PublicKey,
) -> Result<Vec<String>, RelayError> {
    let event = fetch_latest(config, author, Kind::from(KIND_RELAY_LIST))
        .await?
        .ok_or(RelayError::NotFound("relay list"))?;

    let mut relays: Vec<String> = Vec::new();
    for relay in tag_values(&event, "r").filter_map(normalize_relay_url) {
        if !relays.contains(&relay) {
            relays.push(relay);
        }
    }
    Ok(relays)
}
