//! NIP-47 request and reply payloads.
//!
//! Amounts are millisatoshis, timestamps unix seconds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const KIND_NWC_REQUEST: u16 = 23194;
pub const KIND_NWC_RESPONSE: u16 = 23195;
pub const KIND_WALLET_SERVICE_INFO: u16 = 13196;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NwcMethod {
    GetInfo,
    GetBalance,
    ListTransactions,
    MakeInvoice,
    MakeInvoiceFor,
    PayInvoice,
}

impl NwcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NwcMethod::GetInfo => "get_info",
            NwcMethod::GetBalance => "get_balance",
            NwcMethod::ListTransactions => "list_transactions",
            NwcMethod::MakeInvoice => "make_invoice",
            NwcMethod::MakeInvoiceFor => "make_invoice_for",
            NwcMethod::PayInvoice => "pay_invoice",
        }
    }
}

impl fmt::Display for NwcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NwcMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "get_info" => Ok(NwcMethod::GetInfo),
            "get_balance" => Ok(NwcMethod::GetBalance),
            "list_transactions" => Ok(NwcMethod::ListTransactions),
            "make_invoice" => Ok(NwcMethod::MakeInvoice),
            "make_invoice_for" => Ok(NwcMethod::MakeInvoiceFor),
            "pay_invoice" => Ok(NwcMethod::PayInvoice),
            other => Err(format!("unknown wallet method: {other}")),
        }
    }
}

/// Error codes a wallet may return. Codes this client does not know map to
/// [`NwcErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NwcErrorCode {
    InsufficientBalance,
    RateLimited,
    NotImplemented,
    QuotaExceeded,
    Restricted,
    Unauthorized,
    Internal,
    Other,
    PaymentFailed,
    NotFound,
    #[serde(other)]
    Unknown,
}

impl NwcErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NwcErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            NwcErrorCode::RateLimited => "RATE_LIMITED",
            NwcErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            NwcErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            NwcErrorCode::Restricted => "RESTRICTED",
            NwcErrorCode::Unauthorized => "UNAUTHORIZED",
            NwcErrorCode::Internal => "INTERNAL",
            NwcErrorCode::Other => "OTHER",
            NwcErrorCode::PaymentFailed => "PAYMENT_FAILED",
            NwcErrorCode::NotFound => "NOT_FOUND",
            NwcErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for NwcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plaintext of a request event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwcRequest {
    pub method: String,
    pub params: Value,
}

/// Plaintext of a reply event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwcResponse {
    pub result_type: String,
    #[serde(default)]
    pub error: Option<NwcErrorBody>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwcErrorBody {
    pub code: NwcErrorCode,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub notifications: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTransactionsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unpaid: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<TransactionType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    pub payment_hash: String,
    pub amount: u64,
    #[serde(default)]
    pub fees_paid: u64,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionList {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MakeInvoiceRequest {
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// Invoice request on behalf of another pubkey (the payee of a lightning
/// address).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MakeInvoiceForRequest {
    pub pubkey: String,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zap_request: Option<String>,
}

impl MakeInvoiceForRequest {
    pub fn new(pubkey: impl Into<String>, amount: u64) -> Self {
        Self {
            pubkey: pubkey.into(),
            amount,
            ..Self::default()
        }
    }

    /// Commits the invoice to `description` by hash only.
    pub fn with_description_hash_of(mut self, description: &str) -> Self {
        self.description_hash = Some(description_hash(description));
        self
    }

    pub fn with_zap_request(mut self, zap_request: impl Into<String>) -> Self {
        self.zap_request = Some(zap_request.into());
        self
    }
}

/// Hex SHA-256 of an invoice description.
pub fn description_hash(description: &str) -> String {
    hex::encode(Sha256::digest(description.as_bytes()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<TransactionType>,
    pub invoice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(default)]
    pub payment_hash: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayInvoiceRequest {
    pub invoice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub preimage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees_paid: Option<u64>,
}
