//! TRON Deposit Scanner
//!
//! Watches a set of TRON wallets for incoming TRC20 transfers and records
//! each confirmed, successful deposit exactly once. This library provides:
//!
//! - Exact decimal rendering of raw token quantities
//! - A paginated transfer feed client with exponential backoff and jitter
//! - Per-wallet watermark and bounded dedup set persistence
//! - An idempotent LMDB deposit ledger
//! - Alert delivery (log, Telegram)
//!
//! # Architecture
//!
//! Each pass takes a file lock, loads the scan cursors, and walks every
//! tracked wallet in turn. The scanner reads the newest-first transfer feed
//! until it reaches the wallet's watermark, then the pipeline filters,
//! records and announces what is new before persisting the cursors.
//!
//! Insertion into the ledger is keyed by `(wallet, txid)`, so replaying a
//! transfer after a crash never produces a second record.

pub mod amount;
pub mod client;
pub mod config;
pub mod deposit;
pub mod ledger;
pub mod lock;
pub mod output;
pub mod pipeline;
pub mod scanner;
pub mod sync;
pub mod transfer;

pub use client::{TransferSource, TronscanClient};
pub use config::{NotifierMode, ScannerConfig, TrackedWallet};
pub use deposit::{DepositRecord, DepositStatus};
pub use ledger::{Ledger, LmdbLedger};
pub use pipeline::{IngestionPipeline, PassOutcome, PassSummary};
pub use scanner::WalletScanner;
pub use sync::ScanState;
pub use transfer::TransferRecord;
