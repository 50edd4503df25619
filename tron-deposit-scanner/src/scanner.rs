//! Incoming-transfer scanner for a single wallet.
//!
//! Pages backwards through the upstream feed (newest first) and collects
//! transfers received by the wallet that are newer than its watermark. The
//! feed order is what makes stopping at the first old entry safe, so the
//! scanner checks it and refuses to continue on an out-of-order feed.

use thiserror::Error;
use tracing::debug;

use crate::{
    client::{FetchError, TransferSource},
    config::ScannerConfig,
    transfer::TransferRecord,
};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("upstream feed out of order: {txid} at {block_ts} follows an entry at {previous_ts}")]
    OutOfOrder {
        txid: String,
        block_ts: u64,
        previous_ts: u64,
    },
}

impl ScanError {
    /// HTTP status behind the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ScanError::Fetch(e) => e.status(),
            ScanError::OutOfOrder { .. } => None,
        }
    }
}

/// Paginated scanner over a [`TransferSource`].
pub struct WalletScanner<S> {
    source: S,
    /// Token contract the feed is filtered on
    contract: String,
    /// Entries requested per page
    page_size: u32,
    /// Pages fetched per scan at most
    max_pages: u32,
}

impl<S: TransferSource> WalletScanner<S> {
    pub fn new(source: S, contract: &str, page_size: u32, max_pages: u32) -> Self {
        Self {
            source,
            contract: contract.to_string(),
            page_size,
            max_pages,
        }
    }

    pub fn from_config(source: S, config: &ScannerConfig) -> Self {
        Self::new(source, &config.token_contract, config.page_size, config.max_pages)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Transfers into `wallet` newer than `since`, oldest first.
    ///
    /// Outgoing entries are skipped. Pagination stops at the first incoming
    /// entry at or below `since`, on an empty page, or after `max_pages`
    /// pages. Each page starts after the rows actually received, so an
    /// upstream that serves fewer rows than requested skips nothing.
    pub async fn scan_incoming(&self, wallet: &str, since: u64) -> Result<Vec<TransferRecord>, ScanError> {
        let mut incoming = Vec::new();
        let mut previous_ts: Option<u64> = None;
        let mut offset: u32 = 0;

        'pages: for page in 0..self.max_pages {
            let records = self
                .source
                .fetch_page(wallet, &self.contract, offset, self.page_size)
                .await?;
            let page_len = records.len();

            if page_len == 0 {
                break;
            }

            for record in records {
                if let Some(prev) = previous_ts {
                    if record.block_ts > prev {
                        return Err(ScanError::OutOfOrder {
                            txid: record.txid,
                            block_ts: record.block_ts,
                            previous_ts: prev,
                        });
                    }
                }
                previous_ts = Some(record.block_ts);

                if record.to_address != wallet {
                    continue;
                }

                if record.block_ts <= since {
                    debug!(
                        wallet = %wallet,
                        "Reached watermark {} at page {}",
                        since,
                        page
                    );
                    break 'pages;
                }

                incoming.push(record);
            }

            match u32::try_from(page_len).ok().and_then(|n| offset.checked_add(n)) {
                Some(next) => offset = next,
                None => {
                    debug!(wallet = %wallet, "Feed offset limit reached at page {}", page);
                    break;
                }
            }
        }

        incoming.reverse();
        Ok(incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    const WALLET: &str = "TWallet";

    fn transfer(txid: &str, to: &str, block_ts: u64) -> TransferRecord {
        TransferRecord {
            txid: txid.to_string(),
            from_address: if to == WALLET { "TOther" } else { WALLET }.to_string(),
            to_address: to.to_string(),
            block_ts,
            block_number: None,
            raw_quantity: "1000000".to_string(),
            decimals: 6,
            symbol: "USDT".to_string(),
            confirmed: true,
            contract_result: Some("SUCCESS".to_string()),
            final_result: Some("SUCCESS".to_string()),
            reverted: false,
            risk_flag: false,
            raw: Value::Null,
        }
    }

    /// Serves a fixed feed and records requested offsets.
    struct FeedSource {
        feed: Vec<TransferRecord>,
        /// Most rows served per request, whatever the limit
        cap: usize,
        offsets: Mutex<Vec<u32>>,
    }

    impl FeedSource {
        fn new(feed: Vec<TransferRecord>) -> Self {
            Self::capped(feed, usize::MAX)
        }

        fn capped(feed: Vec<TransferRecord>, cap: usize) -> Self {
            Self {
                feed,
                cap,
                offsets: Mutex::new(Vec::new()),
            }
        }

        fn offsets(&self) -> Vec<u32> {
            self.offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransferSource for FeedSource {
        async fn fetch_page(
            &self,
            _address: &str,
            _contract: &str,
            offset: u32,
            limit: u32,
        ) -> Result<Vec<TransferRecord>, FetchError> {
            self.offsets.lock().unwrap().push(offset);
            Ok(self
                .feed
                .iter()
                .skip(offset as usize)
                .take((limit as usize).min(self.cap))
                .cloned()
                .collect())
        }
    }

    fn txids(records: &[TransferRecord]) -> Vec<&str> {
        records.iter().map(|r| r.txid.as_str()).collect()
    }

    #[tokio::test]
    async fn test_stops_at_watermark() {
        let feed = vec![transfer("new", WALLET, 1500), transfer("old", WALLET, 900)];
        let scanner = WalletScanner::new(FeedSource::new(feed), "TContract", 1, 3);

        let records = scanner.scan_incoming(WALLET, 1000).await.unwrap();

        assert_eq!(txids(&records), vec!["new"]);
        // The second page held the old entry; no third page is requested.
        assert_eq!(scanner.source().offsets(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_returns_oldest_first_and_skips_outgoing() {
        let feed = vec![
            transfer("c", WALLET, 300),
            transfer("out", "TElsewhere", 250),
            transfer("b", WALLET, 200),
            transfer("a", WALLET, 100),
        ];
        let scanner = WalletScanner::new(FeedSource::new(feed), "TContract", 2, 3);

        let records = scanner.scan_incoming(WALLET, 0).await.unwrap();

        assert_eq!(txids(&records), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_outgoing_entry_does_not_stop_scan() {
        let feed = vec![
            transfer("out", "TElsewhere", 500),
            transfer("in", WALLET, 400),
        ];
        let scanner = WalletScanner::new(FeedSource::new(feed), "TContract", 10, 3);

        let records = scanner.scan_incoming(WALLET, 450).await.unwrap();
        assert!(records.is_empty());

        let records = scanner.scan_incoming(WALLET, 300).await.unwrap();
        assert_eq!(txids(&records), vec!["in"]);
    }

    #[tokio::test]
    async fn test_respects_page_budget() {
        let feed: Vec<_> = (0..10u64)
            .map(|i| transfer(&format!("tx{}", i), WALLET, 1000 - i))
            .collect();
        let scanner = WalletScanner::new(FeedSource::new(feed), "TContract", 2, 3);

        let records = scanner.scan_incoming(WALLET, 0).await.unwrap();

        assert_eq!(records.len(), 6);
        assert_eq!(records.first().unwrap().txid, "tx5");
        assert_eq!(scanner.source().offsets(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_empty_feed() {
        let scanner = WalletScanner::new(FeedSource::new(Vec::new()), "TContract", 20, 3);

        let records = scanner.scan_incoming(WALLET, 0).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(scanner.source().offsets(), vec![0]);
    }

    #[tokio::test]
    async fn test_capped_pages_continue_from_rows_received() {
        let feed: Vec<_> = (0..5u64)
            .map(|i| transfer(&format!("tx{}", i), WALLET, 1000 - i))
            .collect();
        // Upstream serves 2 rows although 4 are requested.
        let scanner = WalletScanner::new(FeedSource::capped(feed, 2), "TContract", 4, 3);

        let records = scanner.scan_incoming(WALLET, 0).await.unwrap();

        assert_eq!(txids(&records), vec!["tx4", "tx3", "tx2", "tx1", "tx0"]);
        assert_eq!(scanner.source().offsets(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_partial_page_is_not_the_end() {
        let feed = vec![transfer("a", WALLET, 100)];
        let scanner = WalletScanner::new(FeedSource::new(feed), "TContract", 20, 3);

        let records = scanner.scan_incoming(WALLET, 0).await.unwrap();

        assert_eq!(txids(&records), vec!["a"]);
        // Only an empty page ends the scan before the budget.
        assert_eq!(scanner.source().offsets(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_out_of_order_feed_is_an_error() {
        let feed = vec![
            transfer("a", WALLET, 100),
            transfer("b", WALLET, 200),
        ];
        let scanner = WalletScanner::new(FeedSource::new(feed), "TContract", 1, 3);

        let err = scanner.scan_incoming(WALLET, 0).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::OutOfOrder {
                block_ts: 200,
                previous_ts: 100,
                ..
            }
        ));
        assert_eq!(err.status(), None);
    }
}
