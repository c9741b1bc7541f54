use std::time::Duration;

use clap::Parser;
use nostr_sdk::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nostr_relay::{fetch_latest, AggregatorConfig};

#[derive(Debug, Parser)]
#[command(name = "nostr-fetch-latest")]
#[command(about = "Fetch the newest replaceable event of a kind from several relays")]
struct Args {
    /// Author public key (hex or npub).
    #[arg(long)]
    pubkey: String,
    #[arg(long)]
    kind: u16,
    /// Relays to ask. Defaults to NOSTR_OUTBOX_RELAYS or the built-in outbox set.
    #[arg(long)]
    relay: Vec<String>,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let author = PublicKey::parse(&args.pubkey)?;
    let mut config = AggregatorConfig::from_env();
    if !args.relay.is_empty() {
        config.relays = args.relay;
    }
    if let Some(secs) = args.timeout_secs {
        config.deadline = Duration::from_secs(secs);
    }

    info!(author = %author, kind = args.kind, relays = config.relays.len(), "Fetching latest event");
    match fetch_latest(&config, author, Kind::from(args.kind)).await? {
        Some(event) => println!("{}", event.as_json()),
        None => {
            eprintln!("no event found");
            std::process::exit(1);
        }
    }

    Ok(())
}
