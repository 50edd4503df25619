//! Upstream transfer-listing client.
//!
//! Fetches one page of TRC20 transfers for an address from the Tronscan API.
//! Rate limiting (429), server errors and transport failures are retried with
//! exponential backoff plus jitter; any other failure is returned at once.

use async_trait::async_trait;
use rand::Rng;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::ScannerConfig,
    transfer::{parse_page, TransferRecord},
};

const USER_AGENT: &str = concat!("tron-deposit-scanner/", env!("CARGO_PKG_VERSION"));

/// Errors from a single upstream request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned status {status}")]
    Status {
        status: u16,
        /// Seconds from the `Retry-After` header, when present
        retry_after: Option<u64>,
    },

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("malformed response body: {0}")]
    Body(String),
}

impl FetchError {
    /// HTTP status of the failed request, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 429, any 5xx, and failures with no status at all are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            FetchError::Transport(_) => true,
            FetchError::Body(_) => false,
        }
    }

    /// Server-requested wait, ignored when zero.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status {
                retry_after: Some(secs),
                ..
            } if *secs > 0 => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Retry ceiling and backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to every delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            base_delay: Duration::from_millis(900),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_jitter: Duration::from_millis(config.retry_jitter_ms),
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// A positive `Retry-After` replaces the exponential term; the jitter is
    /// added either way.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>, jitter: Duration) -> Duration {
        let base = match retry_after {
            Some(wait) if !wait.is_zero() => wait,
            _ => self.base_delay.saturating_mul(2u32.saturating_pow(attempt)),
        };
        base.saturating_add(jitter)
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..bound))
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry ceiling is hit.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt, e.retry_after(), policy.jitter());
                warn!(
                    status = ?e.status(),
                    "Upstream request failed ({}), retry in {}ms (attempt {}/{})",
                    e,
                    delay.as_millis(),
                    attempt + 1,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A paginated source of transfers, newest first.
#[async_trait]
pub trait TransferSource: Send + Sync {
    /// Fetch the transfers of `contract` touching `address`, starting at
    /// `offset` in the timestamp-descending feed.
    async fn fetch_page(
        &self,
        address: &str,
        contract: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<TransferRecord>, FetchError>;
}

/// Tronscan `token_trc20/transfers` client.
pub struct TronscanClient {
    /// HTTP client with the fixed request timeout
    client: Client,
    /// Transfer listing endpoint
    api_url: String,
    /// Backoff applied to transient failures
    retry: RetryPolicy,
}

impl TronscanClient {
    pub fn new(api_url: &str, timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            retry,
        })
    }

    pub fn from_config(config: &ScannerConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.api_url,
            Duration::from_secs(config.request_timeout_secs),
            RetryPolicy::from_config(config),
        )
    }

    async fn fetch_once(
        &self,
        address: &str,
        contract: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Value, FetchError> {
        let limit = limit.to_string();
        let start = offset.to_string();

        let response = self
            .client
            .get(&self.api_url)
            .header(header::ACCEPT, "application/json")
            .query(&[
                ("relatedAddress", address),
                ("contract_address", contract),
                ("limit", limit.as_str()),
                ("start", start.as_str()),
                ("sort", "-timestamp"),
            ])
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers()));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Body(e.to_string())
            } else {
                FetchError::Transport(e)
            }
        })
    }
}

fn status_error(status: StatusCode, headers: &header::HeaderMap) -> FetchError {
    let retry_after = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    FetchError::Status {
        status: status.as_u16(),
        retry_after,
    }
}

#[async_trait]
impl TransferSource for TronscanClient {
    async fn fetch_page(
        &self,
        address: &str,
        contract: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<TransferRecord>, FetchError> {
        let body = with_retry(&self.retry, || self.fetch_once(address, contract, offset, limit)).await?;
        let records = parse_page(&body);

        debug!(
            wallet = %address,
            offset,
            "Fetched {} transfers",
            records.len()
        );

        Ok(records)
    }
}
