//! Deposit records written to the ledger.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transfer::TransferRecord;

pub const CHAIN: &str = "TRON";
pub const TOKEN_TYPE: &str = "trc20";

/// Business processing state of a deposit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    /// Seen on chain, not yet credited
    #[default]
    Detected,
    /// Credited to the owner
    Credited,
    /// Deliberately not credited
    Ignored,
    /// Crediting failed
    Failed,
}

/// An accepted incoming transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepositRecord {
    /// Receiving wallet
    pub wallet: String,

    pub chain: String,
    pub token_type: String,
    pub token_symbol: String,
    pub token_contract: String,
    pub token_decimals: u32,

    /// Transaction id; unique per wallet
    pub txid: String,
    pub from_address: String,
    pub to_address: String,

    /// Quantity in base units
    pub amount_raw: String,
    /// Decoded decimal amount
    pub amount: String,

    pub block_number: Option<u64>,
    /// Block timestamp (ms)
    pub block_ts: u64,

    pub confirmed: bool,
    pub contract_ret: Option<String>,
    pub final_result: Option<String>,
    pub revert: bool,
    pub risk_transaction: bool,

    pub status: DepositStatus,

    /// Timestamp of detection (RFC 3339)
    pub detected_at: String,

    /// Upstream entry as received
    pub raw: Value,
}

impl DepositRecord {
    /// Create a new detected deposit from an accepted transfer.
    pub fn new(wallet: &str, token_contract: &str, transfer: &TransferRecord, amount: String) -> Self {
        Self {
            wallet: wallet.to_string(),
            chain: CHAIN.to_string(),
            token_type: TOKEN_TYPE.to_string(),
            token_symbol: transfer.symbol.clone(),
            token_contract: token_contract.to_string(),
            token_decimals: transfer.decimals,
            txid: transfer.txid.clone(),
            from_address: transfer.from_address.clone(),
            to_address: transfer.to_address.clone(),
            amount_raw: transfer.raw_quantity.clone(),
            amount,
            block_number: transfer.block_number,
            block_ts: transfer.block_ts,
            confirmed: transfer.confirmed,
            contract_ret: transfer.contract_result.clone(),
            final_result: transfer.final_result.clone(),
            revert: transfer.reverted,
            risk_transaction: transfer.risk_flag,
            status: DepositStatus::Detected,
            detected_at: chrono::Utc::now().to_rfc3339(),
            raw: transfer.raw.clone(),
        }
    }

    /// Ledger key: `wallet:txid`.
    pub fn deposit_id(&self) -> String {
        deposit_key(&self.wallet, &self.txid)
    }
}

pub fn deposit_key(wallet: &str, txid: &str) -> String {
    format!("{}:{}", wallet, txid)
}
