use std::time::Duration;

use nostr_relay::testing::MockRelay;
use nostr_relay::{unix_timestamp, RelayConfig, RelayError};
use nostr_sdk::prelude::*;
use nwc_client::{
    Balance, MakeInvoiceForRequest, Nip04, NwcClient, NwcConfig, NwcError, NwcErrorCode,
    NwcRequest, KIND_NWC_REQUEST, KIND_NWC_RESPONSE,
};
use serde_json::{json, Value};

/// The wallet side of the conversation, scripted over a [`MockRelay`].
struct Wallet {
    keys: Keys,
    nip04: Nip04,
}

impl Wallet {
    fn new() -> Self {
        Self {
            keys: Keys::generate(),
            nip04: Nip04::new(),
        }
    }

    async fn next_request(&self, relay: &mut MockRelay, client: &PublicKey) -> (Event, NwcRequest) {
        let frame = relay.next_frame_of("EVENT").await.expect("request event");
        let event: Event = serde_json::from_value(frame[1].clone()).unwrap();
        event.verify().unwrap();
        assert_eq!(event.kind, Kind::from(KIND_NWC_REQUEST));
        assert_eq!(event.pubkey, *client);
        assert_eq!(
            nostr_relay::tag_value(&event, "p"),
            Some(self.keys.public_key().to_hex().as_str())
        );

        let plaintext = self.nip04.decrypt(&self.keys, client, &event.content).unwrap();
        (event, serde_json::from_str(&plaintext).unwrap())
    }

    fn reply(&self, client: &PublicKey, request_id: &str, body: Value) -> Event {
        let content = self
            .nip04
            .encrypt(&self.keys, client, &body.to_string())
            .unwrap();
        EventBuilder::new(Kind::from(KIND_NWC_RESPONSE), content)
            .tags(vec![
                Tag::public_key(*client),
                Tag::parse(vec!["e", request_id]).unwrap(),
            ])
            .sign_with_keys(&self.keys)
            .unwrap()
    }
}

fn config(relay: &MockRelay, wallet: &Wallet) -> NwcConfig {
    let mut config = NwcConfig::with_generated_key(relay.url(), wallet.keys.public_key());
    config.request_timeout = Duration::from_secs(5);
    config.publish_timeout = Duration::from_secs(2);
    config.relay = RelayConfig {
        reconnect_pause: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(2),
    };
    config
}

/// Starts the client and returns the reply subscription id from its REQ.
async fn started(relay: &mut MockRelay, client: &NwcClient) -> String {
    client.start().unwrap();
    let req = relay.next_frame_of("REQ").await.expect("reply subscription");
    req[1].as_str().unwrap().to_string()
}

#[tokio::test]
async fn reply_subscription_filter() {
    let mut relay = MockRelay::start().await.unwrap();
    let wallet = Wallet::new();
    let client = NwcClient::new(config(&relay, &wallet)).unwrap();

    client.start().unwrap();
    client.start().unwrap();
    let req = relay.next_frame_of("REQ").await.unwrap();
    let filter = &req[2];
    assert_eq!(filter["kinds"], json!([KIND_NWC_RESPONSE]));
    assert_eq!(filter["authors"], json!([wallet.keys.public_key().to_hex()]));
    assert_eq!(filter["#p"], json!([client.public_key().to_hex()]));

    let since = filter["since"].as_u64().unwrap();
    let now = unix_timestamp();
    assert!(since <= now - 10 && since >= now - 12, "since {since}, now {now}");

    // Only one subscription despite the second start.
    assert!(relay
        .next_frame_within(Duration::from_millis(300))
        .await
        .is_none());
}

#[tokio::test]
async fn request_is_correlated_with_its_reply() {
    let mut relay = MockRelay::start().await.unwrap();
    let wallet = Wallet::new();
    let client = NwcClient::new(config(&relay, &wallet)).unwrap();
    let me = client.public_key();
    let sub = started(&mut relay, &client).await;

    let (balance, _) = tokio::join!(client.get_balance(), async {
        let (request, body) = wallet.next_request(&mut relay, &me).await;
        assert_eq!(body.method, "get_balance");
        assert_eq!(body.params, json!({}));
        relay.send_ok(&request.id.to_hex(), true, "");

        // A reply for some other request must not resolve ours.
        let stray = wallet.reply(
            &me,
            &"00".repeat(32),
            json!({"result_type": "get_balance", "result": {"balance": 1}}),
        );
        relay.send_event(&sub, &stray);

        let reply = wallet.reply(
            &me,
            &request.id.to_hex(),
            json!({"result_type": "get_balance", "error": null, "result": {"balance": 5000}}),
        );
        relay.send_event(&sub, &reply);
    });

    assert_eq!(balance.unwrap(), Balance { balance: 5000 });
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn reply_arriving_before_ok_is_not_lost() {
    let mut relay = MockRelay::start().await.unwrap();
    let wallet = Wallet::new();
    let client = NwcClient::new(config(&relay, &wallet)).unwrap();
    let me = client.public_key();
    let sub = started(&mut relay, &client).await;

    let (info, _) = tokio::join!(client.get_info(), async {
        let (request, _) = wallet.next_request(&mut relay, &me).await;
        let reply = wallet.reply(
            &me,
            &request.id.to_hex(),
            json!({"result_type": "get_info", "result": {"alias": "mock", "methods": ["get_info"]}}),
        );
        relay.send_event(&sub, &reply);
        tokio::time::sleep(Duration::from_millis(50)).await;
        relay.send_ok(&request.id.to_hex(), true, "");
    });

    let info = info.unwrap();
    assert_eq!(info.alias, "mock");
    assert_eq!(info.methods, vec!["get_info"]);
}

#[tokio::test]
async fn forged_and_garbled_replies_do_not_fail_the_request() {
    let mut relay = MockRelay::start().await.unwrap();
    let wallet = Wallet::new();
    let impostor = Wallet::new();
    let client = NwcClient::new(config(&relay, &wallet)).unwrap();
    let me = client.public_key();
    let sub = started(&mut relay, &client).await;

    let (balance, _) = tokio::join!(client.get_balance(), async {
        let (request, _) = wallet.next_request(&mut relay, &me).await;
        relay.send_ok(&request.id.to_hex(), true, "");

        let forged = impostor.reply(
            &me,
            &request.id.to_hex(),
            json!({"result_type": "get_balance", "result": {"balance": 1}}),
        );
        relay.send_event(&sub, &forged);

        let garbled = EventBuilder::new(Kind::from(KIND_NWC_RESPONSE), "not?iv=encrypted")
            .tags(vec![
                Tag::public_key(me),
                Tag::parse(vec!["e", &request.id.to_hex()]).unwrap(),
            ])
            .sign_with_keys(&wallet.keys)
            .unwrap();
        relay.send_event(&sub, &garbled);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.pending_count(), 1);

        let reply = wallet.reply(
            &me,
            &request.id.to_hex(),
            json!({"result_type": "get_balance", "result": {"balance": 42}}),
        );
        relay.send_event(&sub, &reply);
    });

    assert_eq!(balance.unwrap(), Balance { balance: 42 });
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn wallet_error_is_surfaced() {
    let mut relay = MockRelay::start().await.unwrap();
    let wallet = Wallet::new();
    let client = NwcClient::new(config(&relay, &wallet)).unwrap();
    let me = client.public_key();
    let sub = started(&mut relay, &client).await;

    let payee = Keys::generate().public_key().to_hex();
    let request = MakeInvoiceForRequest::new(payee.clone(), 21_000)
        .with_description_hash_of("sats for someone");

    let (invoice, _) = tokio::join!(client.make_invoice_for(&request), async {
        let (event, body) = wallet.next_request(&mut relay, &me).await;
        assert_eq!(body.method, "make_invoice_for");
        assert_eq!(body.params["pubkey"], payee.as_str());
        assert_eq!(body.params["amount"], 21_000);
        assert_eq!(body.params["description_hash"].as_str().unwrap().len(), 64);
        assert!(body.params.get("zap_request").is_none());

        relay.send_ok(&event.id.to_hex(), true, "");
        let reply = wallet.reply(
            &me,
            &event.id.to_hex(),
            json!({
                "result_type": "make_invoice_for",
                "error": {"code": "RESTRICTED", "message": "pubkey not allowed"},
                "result": null
            }),
        );
        relay.send_event(&sub, &reply);
    });

    match invoice {
        Err(NwcError::Wallet { code, message }) => {
            assert_eq!(code, NwcErrorCode::Restricted);
            assert_eq!(message, "pubkey not allowed");
        }
        other => panic!("expected wallet error, got {other:?}"),
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let mut relay = MockRelay::start().await.unwrap();
    let wallet = Wallet::new();
    let client = NwcClient::new(config(&relay, &wallet)).unwrap();
    let me = client.public_key();
    let sub = started(&mut relay, &client).await;

    let (outcome, request) = tokio::join!(
        client.send("get_balance", json!({}), Duration::from_millis(300)),
        async {
            let (request, _) = wallet.next_request(&mut relay, &me).await;
            relay.send_ok(&request.id.to_hex(), true, "");
            request
        }
    );

    assert!(matches!(outcome, Err(NwcError::Timeout)));
    assert_eq!(client.pending_count(), 0);

    // Too late: nothing is waiting for it anymore.
    let late = wallet.reply(
        &me,
        &request.id.to_hex(),
        json!({"result_type": "get_balance", "result": {"balance": 1}}),
    );
    relay.send_event(&sub, &late);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn rejected_publish_fails_the_request() {
    let mut relay = MockRelay::start().await.unwrap();
    let wallet = Wallet::new();
    let client = NwcClient::new(config(&relay, &wallet)).unwrap();
    let me = client.public_key();
    started(&mut relay, &client).await;

    let (outcome, _) = tokio::join!(client.get_balance(), async {
        let (request, _) = wallet.next_request(&mut relay, &me).await;
        relay.send_ok(&request.id.to_hex(), false, "restricted: not on whitelist");
    });

    match outcome {
        Err(NwcError::Relay(RelayError::Rejected { message })) => {
            assert_eq!(message, "restricted: not on whitelist");
        }
        other => panic!("expected rejected publish, got {other:?}"),
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
#[ignore]
async fn get_info_from_real_wallet() {
    let client = NwcClient::new(NwcConfig::from_env().expect("NWC_URI missing")).unwrap();
    client.start().unwrap();
    let info = client.get_info().await.unwrap();
    assert!(!info.methods.is_empty());
    client.dispose();
}
