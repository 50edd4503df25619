//! Common test utilities for pipeline integration tests.
//!
//! Provides an in-memory transfer feed, ledger and notifier whose state is
//! shared with the test through `Arc`, so a test can hand boxed copies to the
//! pipeline and still inspect what happened.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::time::Instant;

use tron_deposit_scanner::{
    client::{FetchError, TransferSource},
    config::{parse_wallet_pairs, ScannerConfig},
    deposit::DepositRecord,
    ledger::{InsertOutcome, Ledger},
    output::Notifier,
    transfer::TransferRecord,
};

pub const WALLET_A: &str = "TWalletAaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const WALLET_B: &str = "TWalletBbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const SENDER: &str = "TSenderXxxxxxxxxxxxxxxxxxxxxxxxxxx";

/// Scanner configuration rooted in `dir`, watching both test wallets.
pub fn test_config(dir: &Path) -> ScannerConfig {
    ScannerConfig {
        wallets: parse_wallet_pairs(&format!("{}-Alice,{}-Bob", WALLET_A, WALLET_B)),
        page_size: 5,
        max_pages: 3,
        wallet_pause_ms: 0,
        state_file: dir.join("state.json"),
        lock_file: dir.join("scan.lock"),
        ledger_path: dir.join("ledger"),
        ..Default::default()
    }
}

/// A confirmed, successful incoming transfer entry.
pub fn incoming(txid: &str, to: &str, block_ts: u64, quant: &str) -> Value {
    json!({
        "transaction_id": txid,
        "from_address": SENDER,
        "to_address": to,
        "block_ts": block_ts,
        "block": block_ts / 3000,
        "quant": quant,
        "confirmed": true,
        "contractRet": "SUCCESS",
        "finalResult": "SUCCESS",
        "revert": false,
        "tokenInfo": { "tokenDecimal": 6, "tokenAbbr": "USDT" }
    })
}

/// Newest-first transfer feed per wallet.
#[derive(Clone, Default)]
pub struct FakeFeed {
    feeds: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<(String, u32)>>>,
    call_times: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl FakeFeed {
    /// Prepend entries (given newest first) to a wallet's feed.
    pub fn push_newest(&self, wallet: &str, entries: Vec<Value>) {
        let mut feeds = self.feeds.lock().unwrap();
        let feed = feeds.entry(wallet.to_string()).or_default();
        let mut combined = entries;
        combined.extend(feed.drain(..));
        *feed = combined;
    }

    /// Make every request for `wallet` answer with HTTP 503.
    pub fn set_failing(&self, wallet: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(wallet.to_string());
        } else {
            set.remove(wallet);
        }
    }

    /// Offsets requested so far, per wallet.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    /// When each request was made, per wallet.
    pub fn call_times(&self) -> Vec<(String, Instant)> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferSource for FakeFeed {
    async fn fetch_page(
        &self,
        address: &str,
        _contract: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<TransferRecord>, FetchError> {
        self.calls.lock().unwrap().push((address.to_string(), offset));
        self.call_times
            .lock()
            .unwrap()
            .push((address.to_string(), Instant::now()));

        if self.failing.lock().unwrap().contains(address) {
            return Err(FetchError::Status {
                status: 503,
                retry_after: None,
            });
        }

        let feeds = self.feeds.lock().unwrap();
        let page = feeds
            .get(address)
            .map(|feed| {
                feed.iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .filter_map(TransferRecord::from_entry)
                    .collect()
            })
            .unwrap_or_default();
        Ok(page)
    }
}

/// In-memory ledger keyed by `wallet:txid`.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    records: Arc<Mutex<BTreeMap<String, DepositRecord>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryLedger {
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn records(&self) -> Vec<DepositRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn contains(&self, wallet: &str, txid: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .contains_key(&format!("{}:{}", wallet, txid))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert_deposit(&self, deposit: &DepositRecord) -> anyhow::Result<InsertOutcome> {
        if *self.failing.lock().unwrap() {
            anyhow::bail!("ledger unavailable");
        }

        let mut records = self.records.lock().unwrap();
        let key = deposit.deposit_id();
        if records.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        records.insert(key, deposit.clone());
        Ok(InsertOutcome::Inserted)
    }
}

/// Notifier that remembers every alert it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        if *self.failing.lock().unwrap() {
            anyhow::bail!("chat unreachable");
        }
        Ok(())
    }
}
