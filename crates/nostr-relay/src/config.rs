use std::env;
use std::time::Duration;

const DEFAULT_RECONNECT_PAUSE_MS: u64 = 3_000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;

/// Well-known relays that index replaceable metadata for most pubkeys.
pub const OUTBOX_RELAYS: &[&str] = &[
    "wss://relay.primal.net",
    "wss://purplepag.es",
    "wss://user.kindpag.es/",
    "wss://relay.nos.social/",
];

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between a socket closing and the next connect attempt.
    pub reconnect_pause: Duration,
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect_pause: Duration::from_millis(DEFAULT_RECONNECT_PAUSE_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub relays: Vec<String>,
    /// Global deadline shared by every endpoint in one fetch.
    pub deadline: Duration,
    pub relay: RelayConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            relays: OUTBOX_RELAYS.iter().map(|url| url.to_string()).collect(),
            deadline: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            relay: RelayConfig::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn new(relays: Vec<String>, deadline: Duration) -> Self {
        Self {
            relays,
            deadline,
            relay: RelayConfig::default(),
        }
    }

    /// Reads `NOSTR_OUTBOX_RELAYS` and `NOSTR_FETCH_TIMEOUT_SECS`, falling back
    /// to the defaults for anything unset or empty.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("NOSTR_OUTBOX_RELAYS") {
            let relays = parse_relays(&value);
            if !relays.is_empty() {
                config.relays = relays;
            }
        }

        if let Some(secs) = env::var("NOSTR_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.deadline = Duration::from_secs(secs);
        }

        config
    }
}

pub fn parse_relays(value: &str) -> Vec<String> {
    value
        .split(',')
        .flat_map(|chunk| chunk.split_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}
