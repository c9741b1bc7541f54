use nostr_relay::{fetch_latest, tag_value, tag_values, AggregatorConfig};
use nostr_sdk::prelude::*;
use tracing::debug;

use crate::types::KIND_WALLET_SERVICE_INFO;
use crate::{NwcConfig, NwcError};

/// A wallet service's published info record (kind 13196).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletServiceInfo {
    pub wallet_pubkey: PublicKey,
    /// Relays the service reads requests from, in tag order.
    pub relays: Vec<String>,
    pub min_sendable: Option<u64>,
    pub max_sendable: Option<u64>,
    /// Methods listed in the content, space separated.
    pub methods: Vec<String>,
    pub created_at: Timestamp,
}

impl WalletServiceInfo {
    pub fn from_event(event: &Event) -> Result<Self, NwcError> {
        if event.kind != Kind::from(KIND_WALLET_SERVICE_INFO) {
            return Err(NwcError::Config(format!(
                "expected kind {KIND_WALLET_SERVICE_INFO}, got {}",
                event.kind.as_u16()
            )));
        }

        Ok(Self {
            wallet_pubkey: event.pubkey,
            relays: tag_values(event, "relay").map(String::from).collect(),
            min_sendable: tag_value(event, "minSendable").and_then(|v| v.parse().ok()),
            max_sendable: tag_value(event, "maxSendable").and_then(|v| v.parse().ok()),
            methods: event
                .content
                .split_whitespace()
                .map(String::from)
                .collect(),
            created_at: event.created_at,
        })
    }

    /// Client config for the service's first relay with a fresh client key.
    pub fn connect_config(&self) -> Result<NwcConfig, NwcError> {
        let relay = self
            .relays
            .first()
            .ok_or_else(|| NwcError::Config("wallet service lists no relay".to_string()))?;
        Ok(NwcConfig::with_generated_key(relay.clone(), self.wallet_pubkey))
    }
}

/// Newest service-info record of `wallet` across the aggregator's relays.
pub async fn fetch_wallet_service_info(
    config: &AggregatorConfig,
    wallet: PublicKey,
) -> Result<Option<WalletServiceInfo>, NwcError> {
    let Some(event) = fetch_latest(config, wallet, Kind::from(KIND_WALLET_SERVICE_INFO)).await?
    else {
        debug!(wallet = %wallet, "No wallet service info found");
        return Ok(None);
    };
    WalletServiceInfo::from_event(&event).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_event(keys: &Keys, kind: u16, tags: Vec<Vec<&str>>) -> Event {
        EventBuilder::new(Kind::from(kind), "make_invoice_for get_info")
            .tags(tags.into_iter().map(|tag| Tag::parse(tag).unwrap()))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn test_parse_service_info() {
        let wallet = Keys::generate();
        let event = service_event(
            &wallet,
            KIND_WALLET_SERVICE_INFO,
            vec![
                vec!["relay", "wss://relay.one"],
                vec!["relay", "wss://relay.two"],
                vec!["minSendable", "1000"],
                vec!["maxSendable", "not a number"],
            ],
        );

        let info = WalletServiceInfo::from_event(&event).unwrap();
        assert_eq!(info.wallet_pubkey, wallet.public_key());
        assert_eq!(info.relays, vec!["wss://relay.one", "wss://relay.two"]);
        assert_eq!(info.min_sendable, Some(1000));
        assert_eq!(info.max_sendable, None);
        assert_eq!(info.methods, vec!["make_invoice_for", "get_info"]);

        let config = info.connect_config().unwrap();
        assert_eq!(config.relay_url, "wss://relay.one");
        assert_eq!(config.wallet_pubkey, wallet.public_key());
    }

    #[test]
    fn test_rejects_other_kinds_and_missing_relays() {
        let wallet = Keys::generate();
        let note = service_event(&wallet, 1, vec![]);
        assert!(matches!(
            WalletServiceInfo::from_event(&note),
            Err(NwcError::Config(_))
        ));

        let bare = service_event(&wallet, KIND_WALLET_SERVICE_INFO, vec![]);
        let info = WalletServiceInfo::from_event(&bare).unwrap();
        assert!(info.connect_config().is_err());
    }
}
