//! Nostr Wallet Connect (NIP-47) client.
//!
//! Wallet RPC rides on encrypted relay events: each request is a kind 23194
//! event whose content is a NIP-04 encrypted `{"method", "params"}` envelope,
//! and the wallet answers with a kind 23195 event that points back at the
//! request with an `e` tag.
//!
//! ```text
//! NwcClient ──encrypt──► ["EVENT", 23194 {p: wallet}] ──► relay ──► wallet
//!     ▲                                                              │
//!     └──decrypt── ["EVENT", sub, 23195 {e: request id}] ◄── relay ◄─┘
//! ```
//!
//! # Event Kinds
//!
//! | Kind | Constant | Purpose |
//! |------|----------|---------|
//! | 13196 | `KIND_WALLET_SERVICE_INFO` | Wallet service info record (`relay`, `minSendable`, `maxSendable` tags) |
//! | 23194 | `KIND_NWC_REQUEST` | Encrypted request |
//! | 23195 | `KIND_NWC_RESPONSE` | Encrypted reply |
//!
//! # Example
//!
//! ```rust,ignore
//! use nwc_client::{MakeInvoiceForRequest, NwcClient, NwcConfig};
//!
//! let client = NwcClient::new(NwcConfig::from_env()?)?;
//! client.start()?;
//! let invoice = client
//!     .make_invoice_for(&MakeInvoiceForRequest::new(payee_hex, 21_000))
//!     .await?;
//! client.dispose();
//! ```

mod client;
mod config;
pub mod crypto;
mod error;
mod service_info;
pub mod types;

pub use client::NwcClient;
pub use config::NwcConfig;
pub use crypto::{derive_shared_key, Nip04};
pub use error::{CryptoError, NwcError};
pub use service_info::{fetch_wallet_service_info, WalletServiceInfo};
pub use types::{
    description_hash, Balance, Invoice, ListTransactionsRequest, MakeInvoiceForRequest,
    MakeInvoiceRequest, NwcErrorBody, NwcErrorCode, NwcMethod, NwcRequest, NwcResponse,
    PayInvoiceRequest, PaymentResult, Transaction, TransactionList, TransactionType, WalletInfo,
    KIND_NWC_REQUEST, KIND_NWC_RESPONSE, KIND_WALLET_SERVICE_INFO,
};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
