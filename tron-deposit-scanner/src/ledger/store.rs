use async_trait::async_trait;
use lmdb::{Cursor, Database, Environment, EnvironmentFlags, Transaction, WriteFlags};
use std::{fs, path::Path};
use tracing::debug;

use super::{InsertOutcome, Ledger, LedgerError};
use crate::deposit::{deposit_key, DepositRecord, DepositStatus};

/// LMDB-backed deposit ledger
pub struct LmdbLedger {
    env: Environment,
    /// deposits: "wallet:txid" -> DepositRecord (JSON)
    deposits_db: Database,
}

impl LmdbLedger {
    /// Open or create a ledger in the given directory.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        fs::create_dir_all(path)?;

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(1)
            .set_map_size(1024 * 1024 * 1024) // 1GB
            .open(&path.join("deposits.mdb"))?;

        let deposits_db = env.create_db(Some("deposits"), lmdb::DatabaseFlags::empty())?;

        Ok(Self { env, deposits_db })
    }

    /// Store the deposit if no record exists for its wallet and txid.
    pub fn insert(&self, deposit: &DepositRecord) -> Result<InsertOutcome, LedgerError> {
        let key = deposit.deposit_id();
        let bytes = serde_json::to_vec(deposit).map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let mut txn = self.env.begin_rw_txn()?;
        match txn.put(self.deposits_db, &key, &bytes, WriteFlags::NO_OVERWRITE) {
            Ok(()) => {
                txn.commit()?;
                debug!("Stored deposit {}", key);
                Ok(InsertOutcome::Inserted)
            }
            Err(lmdb::Error::KeyExist) => {
                txn.abort();
                Ok(InsertOutcome::AlreadyPresent)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a deposit by wallet and txid
    pub fn get(&self, wallet: &str, txid: &str) -> Result<Option<DepositRecord>, LedgerError> {
        let txn = self.env.begin_ro_txn()?;

        match txn.get(self.deposits_db, &deposit_key(wallet, txid)) {
            Ok(bytes) => Ok(Some(decode(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent deposits by block time, optionally for one wallet.
    pub fn recent(&self, wallet: Option<&str>, limit: usize) -> Result<Vec<DepositRecord>, LedgerError> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.deposits_db)?;

        let mut deposits = Vec::new();
        match wallet {
            Some(wallet) => {
                let prefix = format!("{}:", wallet);
                for item in cursor.iter_from(prefix.as_bytes()) {
                    let (key, value) = item?;
                    if !key.starts_with(prefix.as_bytes()) {
                        break;
                    }
                    deposits.push(decode(value)?);
                }
            }
            None => {
                for item in cursor.iter_start() {
                    let (_, value) = item?;
                    deposits.push(decode(value)?);
                }
            }
        }

        drop(cursor);
        drop(txn);

        deposits.sort_by(|a, b| b.block_ts.cmp(&a.block_ts));
        deposits.truncate(limit);
        Ok(deposits)
    }

    /// Move an existing deposit to a new processing status.
    ///
    /// Returns `false` if the deposit does not exist.
    pub fn set_status(&self, wallet: &str, txid: &str, status: DepositStatus) -> Result<bool, LedgerError> {
        let key = deposit_key(wallet, txid);
        let mut txn = self.env.begin_rw_txn()?;

        let mut deposit = match txn.get(self.deposits_db, &key) {
            Ok(bytes) => decode(bytes)?,
            Err(lmdb::Error::NotFound) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        deposit.status = status;

        let bytes = serde_json::to_vec(&deposit).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        txn.put(self.deposits_db, &key, &bytes, WriteFlags::empty())?;
        txn.commit()?;

        Ok(true)
    }
}

fn decode(bytes: &[u8]) -> Result<DepositRecord, LedgerError> {
    serde_json::from_slice(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}

#[async_trait]
impl Ledger for LmdbLedger {
    async fn insert_deposit(&self, deposit: &DepositRecord) -> anyhow::Result<InsertOutcome> {
        Ok(self.insert(deposit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferRecord;
    use serde_json::json;
    use tempfile::tempdir;

    fn deposit(wallet: &str, txid: &str, block_ts: u64) -> DepositRecord {
        let transfer = TransferRecord::from_entry(&json!({
            "transaction_id": txid,
            "from_address": "TSender",
            "to_address": wallet,
            "block_ts": block_ts,
            "quant": "1500000",
            "confirmed": true,
            "contractRet": "SUCCESS"
        }))
        .unwrap();
        DepositRecord::new(wallet, "TContract", &transfer, "1.5".to_string())
    }

    #[test]
    fn test_insert_is_idempotent() {
        let dir = tempdir().unwrap();
        let ledger = LmdbLedger::open(dir.path()).unwrap();

        let first = deposit("TA", "tx1", 100);
        assert_eq!(ledger.insert(&first).unwrap(), InsertOutcome::Inserted);

        let mut again = first.clone();
        again.amount = "999".to_string();
        assert_eq!(ledger.insert(&again).unwrap(), InsertOutcome::AlreadyPresent);

        // The first record is untouched.
        let stored = ledger.get("TA", "tx1").unwrap().unwrap();
        assert_eq!(stored.amount, "1.5");
    }

    #[test]
    fn test_same_txid_different_wallets() {
        let dir = tempdir().unwrap();
        let ledger = LmdbLedger::open(dir.path()).unwrap();

        assert!(ledger.insert(&deposit("TA", "tx1", 100)).unwrap().is_new());
        assert!(ledger.insert(&deposit("TB", "tx1", 100)).unwrap().is_new());
    }

    #[test]
    fn test_get_missing() {
        let dir = tempdir().unwrap();
        let ledger = LmdbLedger::open(dir.path()).unwrap();
        assert!(ledger.get("TA", "nope").unwrap().is_none());
    }

    #[test]
    fn test_recent_by_wallet() {
        let dir = tempdir().unwrap();
        let ledger = LmdbLedger::open(dir.path()).unwrap();

        ledger.insert(&deposit("TA", "tx1", 100)).unwrap();
        ledger.insert(&deposit("TA", "tx2", 300)).unwrap();
        ledger.insert(&deposit("TA", "tx3", 200)).unwrap();
        ledger.insert(&deposit("TAB", "tx4", 400)).unwrap();

        let recent = ledger.recent(Some("TA"), 2).unwrap();
        let txids: Vec<_> = recent.iter().map(|d| d.txid.as_str()).collect();
        assert_eq!(txids, vec!["tx2", "tx3"]);

        assert_eq!(ledger.recent(None, 10).unwrap().len(), 4);
    }

    #[test]
    fn test_set_status() {
        let dir = tempdir().unwrap();
        let ledger = LmdbLedger::open(dir.path()).unwrap();
        ledger.insert(&deposit("TA", "tx1", 100)).unwrap();

        assert!(ledger.set_status("TA", "tx1", DepositStatus::Credited).unwrap());
        assert!(!ledger.set_status("TA", "missing", DepositStatus::Credited).unwrap());

        let stored = ledger.get("TA", "tx1").unwrap().unwrap();
        assert_eq!(stored.status, DepositStatus::Credited);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = tempdir().unwrap();
        {
            let ledger = LmdbLedger::open(dir.path()).unwrap();
            ledger.insert(&deposit("TA", "tx1", 100)).unwrap();
        }

        let ledger = LmdbLedger::open(dir.path()).unwrap();
        assert_eq!(
            ledger.insert(&deposit("TA", "tx1", 100)).unwrap(),
            InsertOutcome::AlreadyPresent
        );
    }
}
