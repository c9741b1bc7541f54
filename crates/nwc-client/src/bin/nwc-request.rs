use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nwc_client::{NwcClient, NwcConfig, NwcMethod};

#[derive(Debug, Parser)]
#[command(name = "nwc-request")]
#[command(about = "Send one Nostr Wallet Connect request and print the result")]
struct Args {
    /// get_info, get_balance, list_transactions, make_invoice, make_invoice_for or pay_invoice.
    method: NwcMethod,
    /// Request params as a JSON object.
    #[arg(long, default_value = "{}")]
    params: String,
    /// Connection string. Defaults to NWC_URI.
    #[arg(long)]
    uri: Option<String>,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let config = match &args.uri {
        Some(uri) => NwcConfig::from_uri(uri)?,
        None => NwcConfig::from_env()?,
    };
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(config.request_timeout);
    let params: serde_json::Value = serde_json::from_str(&args.params)?;

    let client = NwcClient::new(config)?;
    client.start()?;
    info!(method = %args.method, relay = %client.relay().url(), "Sending wallet request");

    let result = client.send(args.method.as_str(), params, timeout).await;
    client.dispose();

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
