use nostr_relay::RelayError;
use thiserror::Error;

use crate::types::NwcErrorCode;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed encrypted payload")]
    MalformedPayload,
    #[error("invalid iv length: {0}")]
    InvalidIvLength(usize),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("bad padding")]
    Padding,
    #[error("plaintext is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Errors from wallet RPC calls.
#[derive(Debug, Error)]
pub enum NwcError {
    /// The connection string or config is unusable.
    #[error("invalid wallet connect config: {0}")]
    Config(String),
    /// The wallet answered with an error envelope.
    #[error("wallet error {code}: {message}")]
    Wallet { code: NwcErrorCode, message: String },
    #[error("wallet request timed out")]
    Timeout,
    #[error("event signing failed: {0}")]
    Signing(String),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("nostr key error: {0}")]
    NostrKey(#[from] nostr_sdk::nostr::key::Error),
}
