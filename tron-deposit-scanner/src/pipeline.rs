//! Ingestion pipeline.
//!
//! One pass takes the run lock, loads every wallet's cursor, scans the
//! wallets one after another, records new deposits in the ledger, alerts on
//! first insertion, and writes the cursors back in a single save.
//!
//! Cursor rules:
//! - a txid enters the dedup set only after its ledger write succeeded, or
//!   when it was rejected by the validity filters
//! - the watermark follows every observed transfer, accepted or not
//! - a wallet that fails keeps the cursor it had when the pass started

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    amount::to_display_amount,
    client::TransferSource,
    config::{ScannerConfig, TrackedWallet},
    deposit::DepositRecord,
    ledger::Ledger,
    lock::RunLock,
    output::{format_deposit_alert, Notifier},
    scanner::{ScanError, WalletScanner},
    sync::{ScanState, WalletScanState},
};

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Wallets scanned without error
    pub wallets_scanned: usize,
    /// Wallets whose scan failed
    pub wallets_failed: usize,
    /// Transfers returned by the scanner
    pub candidates: usize,
    /// Deposits inserted into the ledger for the first time
    pub deposits_recorded: usize,
    /// Transfers already in the dedup set or the ledger
    pub duplicates: usize,
    /// Transfers rejected by the validity filters
    pub skipped_invalid: usize,
    /// Dedup entries dropped by pruning
    pub pruned: usize,
    /// Alerts that could not be delivered
    pub notify_failures: usize,
}

/// Result of a pass trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass holds the run lock
    Skipped,
    Completed(PassSummary),
}

/// Drives scan passes over every tracked wallet.
pub struct IngestionPipeline<S> {
    config: ScannerConfig,
    scanner: WalletScanner<S>,
    ledger: Box<dyn Ledger>,
    notifier: Box<dyn Notifier>,
    lock: RunLock,
}

impl<S: TransferSource> IngestionPipeline<S> {
    pub fn new(
        config: ScannerConfig,
        source: S,
        ledger: Box<dyn Ledger>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let stale_after = match config.lock_stale_after_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let lock = RunLock::new(&config.lock_file, stale_after);
        let scanner = WalletScanner::from_config(source, &config);

        Self {
            config,
            scanner,
            ledger,
            notifier,
            lock,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Run one pass unless another one is in progress.
    pub async fn run_pass(&self) -> PassOutcome {
        let guard = match self.lock.try_acquire() {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                info!("Previous pass still running, skipping");
                return PassOutcome::Skipped;
            }
            Err(e) => {
                warn!("Could not create run lock {:?}: {}", self.lock.path(), e);
                return PassOutcome::Skipped;
            }
        };

        let summary = self.run_locked().await;
        guard.release();

        info!(
            "Pass complete: {} wallets scanned, {} failed, {} new deposits, {} skipped, {} duplicates",
            summary.wallets_scanned,
            summary.wallets_failed,
            summary.deposits_recorded,
            summary.skipped_invalid,
            summary.duplicates
        );

        PassOutcome::Completed(summary)
    }

    async fn run_locked(&self) -> PassSummary {
        let mut state = ScanState::load(&self.config.state_file);
        state.ensure_wallets(&self.config.wallets);

        let pause = Duration::from_millis(self.config.wallet_pause_ms);
        let mut summary = PassSummary::default();

        for (index, wallet) in self.config.wallets.iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            let cursor = state.wallet(&wallet.address).cloned().unwrap_or_default();
            match self.process_wallet(wallet, cursor, &mut summary).await {
                Ok(updated) => {
                    state.wallets.insert(wallet.address.clone(), updated);
                    summary.wallets_scanned += 1;
                }
                Err(e) => {
                    summary.wallets_failed += 1;
                    let status = e.downcast_ref::<ScanError>().and_then(ScanError::status);
                    error!(
                        wallet = %wallet.address,
                        status = ?status,
                        "Wallet scan failed: {:#}",
                        e
                    );
                }
            }
        }

        if let Err(e) = state.save(&self.config.state_file) {
            error!("Failed to write scan state {:?}: {:#}", self.config.state_file, e);
        }

        summary
    }

    async fn process_wallet(
        &self,
        wallet: &TrackedWallet,
        mut cursor: WalletScanState,
        summary: &mut PassSummary,
    ) -> anyhow::Result<WalletScanState> {
        let incoming = self
            .scanner
            .scan_incoming(&wallet.address, cursor.last_ts)
            .await?;

        if !incoming.is_empty() {
            debug!(
                wallet = %wallet.address,
                "{} incoming transfers since {}",
                incoming.len(),
                cursor.last_ts
            );
        }

        for transfer in incoming {
            summary.candidates += 1;

            if cursor.is_processed(&transfer.txid) {
                summary.duplicates += 1;
                cursor.advance(transfer.block_ts);
                continue;
            }

            if let Some(reason) = transfer.rejection() {
                debug!(
                    wallet = %wallet.address,
                    txid = %transfer.txid,
                    "Skipping {} transfer",
                    reason
                );
                summary.skipped_invalid += 1;
                cursor.mark_processed(&transfer.txid, transfer.block_ts);
                cursor.advance(transfer.block_ts);
                continue;
            }

            let amount = match to_display_amount(&transfer.raw_quantity, transfer.decimals) {
                Ok(amount) => amount,
                Err(e) => {
                    warn!(
                        wallet = %wallet.address,
                        txid = %transfer.txid,
                        "Skipping transfer with bad quantity: {}",
                        e
                    );
                    summary.skipped_invalid += 1;
                    cursor.mark_processed(&transfer.txid, transfer.block_ts);
                    cursor.advance(transfer.block_ts);
                    continue;
                }
            };

            let deposit = DepositRecord::new(&wallet.address, &self.config.token_contract, &transfer, amount);
            let outcome = self.ledger.insert_deposit(&deposit).await?;

            cursor.mark_processed(&transfer.txid, transfer.block_ts);
            cursor.advance(transfer.block_ts);

            if !outcome.is_new() {
                summary.duplicates += 1;
                continue;
            }

            summary.deposits_recorded += 1;
            info!(
                wallet = %wallet.display_name(),
                txid = %deposit.txid,
                from = %deposit.from_address,
                "New deposit +{} {}",
                deposit.amount,
                deposit.token_symbol
            );

            let text = format_deposit_alert(
                wallet.display_name(),
                &deposit,
                self.config.display_utc_offset_hours,
            );
            if let Err(e) = self.notifier.send(&text).await {
                summary.notify_failures += 1;
                warn!(
                    wallet = %wallet.address,
                    txid = %deposit.txid,
                    "Deposit alert failed: {:#}",
                    e
                );
            }
        }

        summary.pruned += cursor.prune(self.config.dedup_prune_threshold, self.config.dedup_prune_keep);

        Ok(cursor)
    }
}
