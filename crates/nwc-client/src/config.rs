use std::env;
use std::time::Duration;

use nostr_relay::{validate_relay_url, RelayConfig};
use nostr_sdk::prelude::*;
use ::url::Url;

use crate::NwcError;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 10;
const URI_SCHEMES: &[&str] = &["nostr+walletconnect", "nostrwalletconnect"];

#[derive(Clone)]
pub struct NwcConfig {
    /// Relay the wallet service listens on.
    pub relay_url: String,
    pub wallet_pubkey: PublicKey,
    /// Client key the wallet authorized for this connection.
    pub secret_key: SecretKey,
    /// How long a request waits for the wallet's reply.
    pub request_timeout: Duration,
    /// How long a request event waits for the relay's `OK`.
    pub publish_timeout: Duration,
    pub relay: RelayConfig,
}

impl NwcConfig {
    pub fn new(relay_url: impl Into<String>, wallet_pubkey: PublicKey, secret_key: SecretKey) -> Self {
        Self {
            relay_url: relay_url.into(),
            wallet_pubkey,
            secret_key,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
            relay: RelayConfig::default(),
        }
    }

    /// Config with a throwaway client key, for wallets that accept requests
    /// from any key (e.g. `make_invoice_for` on a lightning address service).
    pub fn with_generated_key(relay_url: impl Into<String>, wallet_pubkey: PublicKey) -> Self {
        let keys = Keys::generate();
        Self::new(relay_url, wallet_pubkey, keys.secret_key().clone())
    }

    /// Parses `nostr+walletconnect://<wallet pubkey>?relay=<url>&secret=<hex>`.
    ///
    /// Only the first `relay` parameter is used.
    pub fn from_uri(uri: &str) -> Result<Self, NwcError> {
        let url = Url::parse(uri.trim()).map_err(|err| NwcError::Config(err.to_string()))?;
        if !URI_SCHEMES.contains(&url.scheme()) {
            return Err(NwcError::Config(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let wallet = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| NwcError::Config("missing wallet pubkey".to_string()))?;
        let wallet_pubkey = PublicKey::parse(wallet)?;

        let mut relay_url = None;
        let mut secret = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay" if relay_url.is_none() => relay_url = Some(value.into_owned()),
                "secret" => secret = Some(value.into_owned()),
                _ => {}
            }
        }

        let relay_url =
            relay_url.ok_or_else(|| NwcError::Config("missing relay parameter".to_string()))?;
        validate_relay_url(&relay_url)?;
        let secret =
            secret.ok_or_else(|| NwcError::Config("missing secret parameter".to_string()))?;
        let secret_key = SecretKey::parse(&secret)?;

        Ok(Self::new(relay_url, wallet_pubkey, secret_key))
    }

    /// Reads `NWC_URI`, plus the optional `NWC_TIMEOUT_SECS` request timeout.
    pub fn from_env() -> Result<Self, NwcError> {
        let uri = env::var("NWC_URI").map_err(|_| NwcError::Config("NWC_URI not set".to_string()))?;
        let mut config = Self::from_uri(&uri)?;
        if let Some(secs) = env::var("NWC_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn keys(&self) -> Keys {
        Keys::new(self.secret_key.clone())
    }
}

impl std::fmt::Debug for NwcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NwcConfig")
            .field("relay_url", &self.relay_url)
            .field("wallet_pubkey", &self.wallet_pubkey)
            .field("secret_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}
