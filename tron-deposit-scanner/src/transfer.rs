//! Transfer records observed on the upstream feed.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::amount::DEFAULT_DECIMALS;

/// Result sentinel the upstream reports for an executed transfer.
pub const SUCCESS: &str = "SUCCESS";

/// Symbol assumed when the upstream entry does not carry token info.
pub const DEFAULT_SYMBOL: &str = "USDT";

/// One token transfer as reported by the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    /// Transaction id (hex)
    pub txid: String,

    /// Sender address
    pub from_address: String,

    /// Recipient address
    pub to_address: String,

    /// Block timestamp in milliseconds
    pub block_ts: u64,

    /// Block number, when reported
    pub block_number: Option<u64>,

    /// Quantity in token base units (decimal integer string)
    pub raw_quantity: String,

    /// Token decimal places
    pub decimals: u32,

    /// Token symbol
    pub symbol: String,

    /// Whether the upstream considers the transaction final
    pub confirmed: bool,

    /// Contract execution result
    pub contract_result: Option<String>,

    /// Final transaction result
    pub final_result: Option<String>,

    /// Whether the transaction was reverted
    pub reverted: bool,

    /// Upstream risk flag (recorded, not filtered on)
    pub risk_flag: bool,

    /// The upstream entry as received, kept for audit
    pub raw: Value,
}

/// Why a transfer was not accepted as a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unconfirmed,
    NotSuccessful,
    Reverted,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unconfirmed => write!(f, "unconfirmed"),
            Rejection::NotSuccessful => write!(f, "not successful"),
            Rejection::Reverted => write!(f, "reverted"),
        }
    }
}

impl TransferRecord {
    /// Build a record from one `token_transfers` entry.
    ///
    /// Returns `None` for entries without a transaction id.
    pub fn from_entry(entry: &Value) -> Option<Self> {
        let txid = str_field(entry, "transaction_id")?;
        if txid.is_empty() {
            return None;
        }

        let token_info = entry.get("tokenInfo");
        let decimals = token_info
            .and_then(|info| u64_field(info, "tokenDecimal"))
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(DEFAULT_DECIMALS);
        let symbol = token_info
            .and_then(|info| str_field(info, "tokenAbbr"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());

        Some(Self {
            txid,
            from_address: str_field(entry, "from_address").unwrap_or_default(),
            to_address: str_field(entry, "to_address").unwrap_or_default(),
            block_ts: u64_field(entry, "block_ts").unwrap_or(0),
            block_number: u64_field(entry, "block"),
            raw_quantity: str_field(entry, "quant").unwrap_or_else(|| "0".to_string()),
            decimals,
            symbol,
            confirmed: bool_field(entry, "confirmed"),
            contract_result: str_field(entry, "contractRet"),
            final_result: str_field(entry, "finalResult"),
            reverted: bool_field(entry, "revert"),
            risk_flag: bool_field(entry, "riskTransaction"),
            raw: entry.clone(),
        })
    }

    /// Check the validity filters in order: confirmed, successful, not reverted.
    pub fn rejection(&self) -> Option<Rejection> {
        if !self.confirmed {
            return Some(Rejection::Unconfirmed);
        }
        let succeeded = self.contract_result.as_deref() == Some(SUCCESS)
            || self.final_result.as_deref() == Some(SUCCESS);
        if !succeeded {
            return Some(Rejection::NotSuccessful);
        }
        if self.reverted {
            return Some(Rejection::Reverted);
        }
        None
    }
}

/// Parse the transfer list out of a page response body.
pub fn parse_page(body: &Value) -> Vec<TransferRecord> {
    body.get("token_transfers")
        .and_then(|list| list.as_array())
        .map(|list| list.iter().filter_map(TransferRecord::from_entry).collect())
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Numbers occasionally arrive as strings.
fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}
