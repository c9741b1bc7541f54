use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nostr_relay::{tag_value, RelayClient, SubscriptionRequest};
use nostr_sdk::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::crypto::Nip04;
use crate::types::{
    Balance, Invoice, ListTransactionsRequest, MakeInvoiceForRequest, MakeInvoiceRequest,
    NwcMethod, NwcRequest, NwcResponse, PayInvoiceRequest, PaymentResult, TransactionList,
    WalletInfo, KIND_NWC_REQUEST, KIND_NWC_RESPONSE,
};
use crate::{NwcConfig, NwcError};

/// Replies may be stamped slightly before the subscription starts.
const REPLY_LOOKBACK_SECS: u64 = 10;

type PendingReply = oneshot::Sender<Result<Value, NwcError>>;
type PendingTable = Arc<Mutex<HashMap<String, PendingReply>>>;

/// Wallet RPC over one relay connection.
///
/// Requests are NIP-04 encrypted kind 23194 events addressed to the wallet;
/// replies are kind 23195 events matched to their request by the first `e`
/// tag.
pub struct NwcClient {
    relay: RelayClient,
    keys: Keys,
    wallet: PublicKey,
    nip04: Arc<Nip04>,
    pending: PendingTable,
    reply_subscription: Mutex<Option<String>>,
    request_timeout: Duration,
    publish_timeout: Duration,
}

impl NwcClient {
    pub fn new(config: NwcConfig) -> Result<Self, NwcError> {
        Self::with_nip04(config, Arc::new(Nip04::new()))
    }

    /// Like [`NwcClient::new`], sharing a key cache with other clients.
    pub fn with_nip04(config: NwcConfig, nip04: Arc<Nip04>) -> Result<Self, NwcError> {
        let keys = config.keys();
        let relay = RelayClient::new(config.relay_url.as_str(), config.relay.clone())?;
        Ok(Self {
            relay,
            keys,
            wallet: config.wallet_pubkey,
            nip04,
            pending: Arc::new(Mutex::new(HashMap::new())),
            reply_subscription: Mutex::new(None),
            request_timeout: config.request_timeout,
            publish_timeout: config.publish_timeout,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn wallet_pubkey(&self) -> PublicKey {
        self.wallet
    }

    pub fn relay(&self) -> &RelayClient {
        &self.relay
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Opens the live reply subscription. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), NwcError> {
        let mut reply_subscription = self
            .reply_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if reply_subscription.is_some() {
            return Ok(());
        }

        let since = Timestamp::now().as_secs().saturating_sub(REPLY_LOOKBACK_SECS);
        let filter = Filter::new()
            .kind(Kind::from(KIND_NWC_RESPONSE))
            .author(self.wallet)
            .pubkey(self.keys.public_key())
            .since(Timestamp::from(since));

        let pending = self.pending.clone();
        let nip04 = self.nip04.clone();
        let keys = self.keys.clone();
        let wallet = self.wallet;
        let request = SubscriptionRequest::live(filter)
            .on_event(move |event| handle_reply(&pending, &nip04, &keys, &wallet, event));

        let id = request.id.clone();
        self.relay.subscribe(request)?;
        info!(relay = %self.relay.url(), wallet = %self.wallet, subscription_id = %id, "Wallet reply subscription started");
        *reply_subscription = Some(id);
        Ok(())
    }

    /// Sends one request and waits up to `timeout` for the wallet's reply.
    ///
    /// Starts the reply subscription if [`NwcClient::start`] has not been
    /// called yet.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, NwcError> {
        self.start()?;

        let plaintext = serde_json::to_string(&NwcRequest {
            method: method.to_string(),
            params,
        })?;
        let content = self.nip04.encrypt(&self.keys, &self.wallet, &plaintext)?;
        let event = EventBuilder::new(Kind::from(KIND_NWC_REQUEST), content)
            .tag(Tag::public_key(self.wallet))
            .sign_with_keys(&self.keys)
            .map_err(|err| NwcError::Signing(err.to_string()))?;
        let request_id = event.id.to_hex();

        let (reply, outcome) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), reply);

        info!(relay = %self.relay.url(), method, request_id = %request_id, "Sending wallet request");
        if let Err(err) = self.relay.publish(event, self.publish_timeout).await {
            lock(&self.pending).remove(&request_id);
            warn!(method, request_id = %request_id, error = %err, "Wallet request publish failed");
            return Err(err.into());
        }

        match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NwcError::Timeout),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                warn!(method, request_id = %request_id, "Wallet request timeout");
                Err(NwcError::Timeout)
            }
        }
    }

    async fn call<P, R>(&self, method: NwcMethod, params: &P) -> Result<R, NwcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self
            .send(method.as_str(), params, self.request_timeout)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_info(&self) -> Result<WalletInfo, NwcError> {
        self.call(NwcMethod::GetInfo, &json!({})).await
    }

    pub async fn get_balance(&self) -> Result<Balance, NwcError> {
        self.call(NwcMethod::GetBalance, &json!({})).await
    }

    pub async fn list_transactions(
        &self,
        params: &ListTransactionsRequest,
    ) -> Result<TransactionList, NwcError> {
        self.call(NwcMethod::ListTransactions, params).await
    }

    pub async fn make_invoice(&self, params: &MakeInvoiceRequest) -> Result<Invoice, NwcError> {
        self.call(NwcMethod::MakeInvoice, params).await
    }

    pub async fn make_invoice_for(
        &self,
        params: &MakeInvoiceForRequest,
    ) -> Result<Invoice, NwcError> {
        self.call(NwcMethod::MakeInvoiceFor, params).await
    }

    pub async fn pay_invoice(&self, params: &PayInvoiceRequest) -> Result<PaymentResult, NwcError> {
        self.call(NwcMethod::PayInvoice, params).await
    }

    /// Disposes the relay connection. Requests still waiting resolve through
    /// their own timeouts.
    pub fn dispose(&self) {
        self.relay.dispose();
    }
}

impl std::fmt::Debug for NwcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NwcClient")
            .field("relay", &self.relay.url())
            .field("wallet", &self.wallet)
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn lock(pending: &PendingTable) -> MutexGuard<'_, HashMap<String, PendingReply>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn handle_reply(
    pending: &PendingTable,
    nip04: &Nip04,
    keys: &Keys,
    wallet: &PublicKey,
    event: &Event,
) {
    if event.kind != Kind::from(KIND_NWC_RESPONSE) {
        return;
    }
    if event.pubkey != *wallet {
        debug!(event_id = %event.id, author = %event.pubkey, "Ignoring reply from non-wallet author");
        return;
    }
    let Some(request_id) = tag_value(event, "e") else {
        debug!(event_id = %event.id, "Wallet reply without request id");
        return;
    };
    // Replies to other clients sharing the key, or to requests that already
    // timed out.
    if !lock(pending).contains_key(request_id) {
        debug!(request_id, "Ignoring unmatched wallet reply");
        return;
    }

    // An unreadable reply leaves the request waiting for a good one or its
    // timeout.
    let response = match open_reply(nip04, keys, wallet, &event.content) {
        Ok(response) => response,
        Err(err) => {
            warn!(request_id, event_id = %event.id, error = %err, "Unreadable wallet reply");
            return;
        }
    };
    let Some(reply) = lock(pending).remove(request_id) else {
        return;
    };
    let outcome = reply_result(response);
    if let Err(err) = &outcome {
        warn!(request_id, error = %err, "Wallet reply failed");
    } else {
        debug!(request_id, "Wallet reply received");
    }
    let _ = reply.send(outcome);
}

fn open_reply(
    nip04: &Nip04,
    keys: &Keys,
    wallet: &PublicKey,
    content: &str,
) -> Result<NwcResponse, NwcError> {
    let plaintext = nip04.decrypt(keys, wallet, content)?;
    Ok(serde_json::from_str(&plaintext)?)
}

fn reply_result(response: NwcResponse) -> Result<Value, NwcError> {
    match response.error {
        Some(error) => Err(NwcError::Wallet {
            code: error.code,
            message: error.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NwcErrorCode;

    fn reply_event(wallet: &Keys, client: &PublicKey, request_id: &str, content: String) -> Event {
        EventBuilder::new(Kind::from(KIND_NWC_RESPONSE), content)
            .tags(vec![
                Tag::public_key(*client),
                Tag::parse(vec!["e", request_id]).unwrap(),
            ])
            .sign_with_keys(wallet)
            .unwrap()
    }

    #[test]
    fn test_reply_resolves_matching_request_only() {
        let client = Keys::generate();
        let wallet = Keys::generate();
        let nip04 = Nip04::new();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        lock(&pending).insert("aa".repeat(32), tx);

        let body = nip04
            .encrypt(
                &wallet,
                &client.public_key(),
                r#"{"result_type":"get_balance","result":{"balance":21}}"#,
            )
            .unwrap();

        let stray = reply_event(&wallet, &client.public_key(), &"bb".repeat(32), body.clone());
        handle_reply(&pending, &nip04, &client, &wallet.public_key(), &stray);
        assert_eq!(lock(&pending).len(), 1);
        assert!(rx.try_recv().is_err());

        let matching = reply_event(&wallet, &client.public_key(), &"aa".repeat(32), body);
        handle_reply(&pending, &nip04, &client, &wallet.public_key(), &matching);
        assert!(lock(&pending).is_empty());
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"balance": 21}));
    }

    #[test]
    fn test_foreign_or_unreadable_replies_leave_request_pending() {
        let client = Keys::generate();
        let wallet = Keys::generate();
        let stranger = Keys::generate();
        let nip04 = Nip04::new();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        let request_id = "cc".repeat(32);
        lock(&pending).insert(request_id.clone(), tx);

        let body = r#"{"result_type":"get_balance","result":{"balance":7}}"#;
        let spoofed = nip04
            .encrypt(&stranger, &client.public_key(), body)
            .unwrap();
        let foreign = reply_event(&stranger, &client.public_key(), &request_id, spoofed);
        handle_reply(&pending, &nip04, &client, &wallet.public_key(), &foreign);
        assert_eq!(lock(&pending).len(), 1);

        let junk = format!("{}?iv={}", "A".repeat(24), "B".repeat(24));
        let garbled = reply_event(&wallet, &client.public_key(), &request_id, junk);
        handle_reply(&pending, &nip04, &client, &wallet.public_key(), &garbled);
        assert_eq!(lock(&pending).len(), 1);
        assert!(rx.try_recv().is_err());

        let good = nip04.encrypt(&wallet, &client.public_key(), body).unwrap();
        let reply = reply_event(&wallet, &client.public_key(), &request_id, good);
        handle_reply(&pending, &nip04, &client, &wallet.public_key(), &reply);
        assert!(lock(&pending).is_empty());
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"balance": 7}));
    }

    #[test]
    fn test_wallet_error_envelope() {
        let client = Keys::generate();
        let wallet = Keys::generate();
        let nip04 = Nip04::new();
        let content = nip04
            .encrypt(
                &wallet,
                &client.public_key(),
                r#"{"result_type":"pay_invoice","error":{"code":"INSUFFICIENT_BALANCE","message":"not enough sats"},"result":null}"#,
            )
            .unwrap();

        let response = open_reply(&nip04, &client, &wallet.public_key(), &content).unwrap();
        match reply_result(response) {
            Err(NwcError::Wallet { code, message }) => {
                assert_eq!(code, NwcErrorCode::InsufficientBalance);
                assert_eq!(message, "not enough sats");
            }
            other => panic!("expected wallet error, got {other:?}"),
        }
    }
}
