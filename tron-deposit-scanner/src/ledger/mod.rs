//! Deposit ledger.
//!
//! The pipeline only needs an idempotent insert that says whether the
//! deposit was new; that decides whether an alert goes out.

mod store;

pub use store::LmdbLedger;

use async_trait::async_trait;
use thiserror::Error;

use crate::deposit::DepositRecord;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] lmdb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The deposit was not known before this call
    Inserted,
    /// A deposit with the same wallet and txid already exists; nothing changed
    AlreadyPresent,
}

impl InsertOutcome {
    pub fn is_new(self) -> bool {
        self == InsertOutcome::Inserted
    }
}

/// Long-term storage for accepted deposits, keyed by `(wallet, txid)`.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert the deposit unless its key exists. Never updates.
    async fn insert_deposit(&self, deposit: &DepositRecord) -> anyhow::Result<InsertOutcome>;
}
