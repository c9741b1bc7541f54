use std::time::{SystemTime, UNIX_EPOCH};

use nostr_sdk::prelude::*;
use ::url::Url;

use crate::RelayError;

/// Accepts only `ws://` and `wss://` endpoints with a host.
pub fn validate_relay_url(value: &str) -> Result<Url, RelayError> {
    let url = Url::parse(value).map_err(|err| RelayError::InvalidUrl(format!("{value}: {err}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RelayError::InvalidUrl(format!(
                "{value}: unsupported scheme {other}"
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RelayError::InvalidUrl(format!("{value}: missing host")));
    }
    Ok(url)
}

/// Normalizes a relay advertised in someone's relay list.
///
/// Returns `None` for anything this client should not dial: non-websocket
/// schemes, onion services and loopback hosts.
pub fn normalize_relay_url(value: &str) -> Option<String> {
    let url = validate_relay_url(value.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if host.ends_with(".onion") || host == "localhost" || host == "127.0.0.1" {
        return None;
    }

    let mut normalized = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{port}"));
    }
    let path = url.path().trim_end_matches('/');
    normalized.push_str(path);
    Some(normalized)
}

/// First value of the first tag named `name`.
pub fn tag_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event.tags.iter().find_map(|tag| match tag.as_slice() {
        [tag_name, value, ..] if tag_name == name => Some(value.as_str()),
        _ => None,
    })
}

/// First value of every tag named `name`, in tag order.
pub fn tag_values<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    event.tags.iter().filter_map(move |tag| match tag.as_slice() {
        [tag_name, value, ..] if tag_name == name => Some(value.as_str()),
        _ => None,
    })
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
