//! Scan cursor persistence.
//!
//! Each tracked wallet keeps a watermark (the newest block timestamp seen)
//! and a bounded set of processed transaction ids. The whole document is
//! loaded at the start of a pass and rewritten at the end, enabling
//! resumable scanning after restarts.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

use crate::config::TrackedWallet;

/// Dedup set size that triggers pruning.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 3000;

/// Entries kept after pruning.
pub const DEFAULT_PRUNE_KEEP: usize = 2000;

/// Cursor for a single wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletScanState {
    /// Highest block timestamp observed (ms); never decreases
    #[serde(rename = "lastTs", default)]
    pub last_ts: u64,

    /// Processed transaction ids mapped to their block timestamp (ms)
    #[serde(rename = "processed", default)]
    pub processed: BTreeMap<String, u64>,
}

impl WalletScanState {
    pub fn is_processed(&self, txid: &str) -> bool {
        self.processed.contains_key(txid)
    }

    pub fn mark_processed(&mut self, txid: &str, block_ts: u64) {
        self.processed.insert(txid.to_string(), block_ts);
    }

    /// Move the watermark forward to `block_ts` if it is newer.
    pub fn advance(&mut self, block_ts: u64) {
        self.last_ts = self.last_ts.max(block_ts);
    }

    /// Apply [`prune_processed`] to this wallet's dedup set.
    pub fn prune(&mut self, threshold: usize, keep: usize) -> usize {
        prune_processed(&mut self.processed, threshold, keep)
    }
}

/// Shrink a dedup set once it grows past `threshold` entries.
///
/// Only the `keep` most recent entries by block timestamp survive (ties keep
/// the smaller txid). The gap between `threshold` and `keep` means pruning
/// happens once per `threshold - keep` new entries instead of on every pass.
/// A pruned id older than the watermark cannot come back through the scanner,
/// but one still inside the feed window would be treated as new again.
///
/// Returns the number of entries removed.
pub fn prune_processed(processed: &mut BTreeMap<String, u64>, threshold: usize, keep: usize) -> usize {
    if processed.len() <= threshold {
        return 0;
    }

    let mut entries: Vec<(String, u64)> = std::mem::take(processed).into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let removed = entries.len().saturating_sub(keep);
    entries.truncate(keep);
    *processed = entries.into_iter().collect();

    removed
}

/// Persistent cursors for every wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    #[serde(default)]
    pub wallets: BTreeMap<String, WalletScanState>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load scan state from a file.
    ///
    /// A missing, empty or unreadable file yields a fresh state; the next
    /// save replaces it.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("No scan state file found, starting from scratch");
            return Self::default();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to read scan state {:?}: {}", path, e);
                return Self::default();
            }
        };
        if content.trim().is_empty() {
            return Self::default();
        }

        match serde_json::from_str::<ScanState>(&content) {
            Ok(state) => {
                tracing::debug!("Loaded scan state for {} wallets", state.wallets.len());
                state
            }
            Err(e) => {
                tracing::warn!("Ignoring unparseable scan state {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save scan state to a file.
    ///
    /// Uses atomic write (write to temp file, then rename) to prevent corruption.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        tracing::debug!("Saved scan state for {} wallets", self.wallets.len());

        Ok(())
    }

    /// Give every tracked wallet a cursor, starting from zero.
    pub fn ensure_wallets(&mut self, wallets: &[TrackedWallet]) {
        for wallet in wallets {
            self.wallets.entry(wallet.address.clone()).or_default();
        }
    }

    pub fn wallet(&self, address: &str) -> Option<&WalletScanState> {
        self.wallets.get(address)
    }

    /// Get a human-readable summary of the cursors.
    pub fn summary(&self) -> String {
        if self.wallets.is_empty() {
            return "Scan State: no wallets scanned yet".to_string();
        }

        let mut lines = vec![format!("Scan State: {} wallets", self.wallets.len())];
        for (address, cursor) in &self.wallets {
            let last_seen = if cursor.last_ts == 0 {
                "never".to_string()
            } else {
                chrono::DateTime::from_timestamp_millis(cursor.last_ts as i64)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| cursor.last_ts.to_string())
            };
            lines.push(format!(
                "  {}: watermark {} ({}), {} processed txids",
                address,
                cursor.last_ts,
                last_seen,
                cursor.processed.len()
            ));
        }
        lines.join("\n")
    }
}
