//! Configuration for the deposit scanner.

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf, time::Duration};

use crate::sync::{DEFAULT_PRUNE_KEEP, DEFAULT_PRUNE_THRESHOLD};

/// Tronscan TRC20 transfer listing.
pub const DEFAULT_API_URL: &str = "https://apilist.tronscan.org/api/token_trc20/transfers";

/// USDT on TRON.
pub const USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

/// Notification transport for new deposits.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifierMode {
    /// Write alerts to the log
    #[default]
    Log,
    /// Send alerts through a Telegram bot
    Telegram,
}

/// A watched address and the name shown in alerts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedWallet {
    pub address: String,

    #[serde(default)]
    pub name: Option<String>,
}

impl TrackedWallet {
    /// Name shown in alerts and logs, falling back to the address.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.address,
        }
    }
}

/// Parse `address-name,address-name,...`.
///
/// The first `-` separates the address from the name, so names may contain
/// dashes. An entry without a name uses the address as its name.
pub fn parse_wallet_pairs(raw: &str) -> Vec<TrackedWallet> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (address, name) = match pair.split_once('-') {
                Some((address, name)) => (address.trim(), name.trim()),
                None => (pair, ""),
            };
            if address.is_empty() {
                return None;
            }
            Some(TrackedWallet {
                address: address.to_string(),
                name: (!name.is_empty()).then(|| name.to_string()),
            })
        })
        .collect()
}

/// Scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Wallets to watch for incoming transfers
    #[serde(default)]
    pub wallets: Vec<TrackedWallet>,

    /// Transfer listing endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Token contract to filter on
    #[serde(default = "default_token_contract")]
    pub token_contract: String,

    /// Transfers requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Pages fetched per wallet per pass
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt on 429/5xx/network errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubled on each retry
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound of the random jitter added to retry delays
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter_ms: u64,

    /// Pause between wallets in milliseconds
    #[serde(default = "default_wallet_pause")]
    pub wallet_pause_ms: u64,

    /// Seconds between passes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// State file for watermarks and processed transaction ids
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Lock marker guarding against overlapping passes
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Age after which a leftover lock marker is reclaimed (0 = never)
    #[serde(default = "default_lock_stale_after")]
    pub lock_stale_after_secs: u64,

    /// Dedup set size that triggers pruning
    #[serde(default = "default_prune_threshold")]
    pub dedup_prune_threshold: usize,

    /// Dedup entries kept after pruning
    #[serde(default = "default_prune_keep")]
    pub dedup_prune_keep: usize,

    /// LMDB deposit ledger location
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Notification transport
    #[serde(default)]
    pub notifier: NotifierMode,

    /// Telegram bot token (required if notifier = telegram)
    pub telegram_bot_token: Option<String>,

    /// Telegram chat id (required if notifier = telegram)
    pub telegram_chat_id: Option<String>,

    /// UTC offset used when formatting block times in alerts
    #[serde(default = "default_display_offset")]
    pub display_utc_offset_hours: i32,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_token_contract() -> String {
    USDT_CONTRACT.to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_max_pages() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    6
}

fn default_retry_base_delay() -> u64 {
    900
}

fn default_retry_jitter() -> u64 {
    250
}

fn default_wallet_pause() -> u64 {
    350
}

fn default_poll_interval() -> u64 {
    180
}

fn default_state_file() -> PathBuf {
    PathBuf::from("wallet_cron_state.json")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("wallet_cron.lock")
}

fn default_lock_stale_after() -> u64 {
    3600
}

fn default_prune_threshold() -> usize {
    DEFAULT_PRUNE_THRESHOLD
}

fn default_prune_keep() -> usize {
    DEFAULT_PRUNE_KEEP
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("deposits-ledger")
}

fn default_display_offset() -> i32 {
    7
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            api_url: default_api_url(),
            token_contract: default_token_contract(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_jitter_ms: default_retry_jitter(),
            wallet_pause_ms: default_wallet_pause(),
            poll_interval_secs: default_poll_interval(),
            state_file: default_state_file(),
            lock_file: default_lock_file(),
            lock_stale_after_secs: default_lock_stale_after(),
            dedup_prune_threshold: default_prune_threshold(),
            dedup_prune_keep: default_prune_keep(),
            ledger_path: default_ledger_path(),
            notifier: NotifierMode::default(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            display_utc_offset_hours: default_display_offset(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate the result.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: ScannerConfig = toml::from_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `WALLETS`, `TELEGRAM_BOT_TOKEN` and
    /// `TELEGRAM_CHAT_ID`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("WALLETS") {
            let wallets = parse_wallet_pairs(&raw);
            if !wallets.is_empty() {
                self.wallets = wallets;
            }
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram_bot_token = Some(token);
        }
        if let Some(chat_id) = lookup("TELEGRAM_CHAT_ID").filter(|v| !v.is_empty()) {
            self.telegram_chat_id = Some(chat_id);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.wallets.is_empty() {
            anyhow::bail!("At least one wallet must be configured (wallets or WALLETS)");
        }

        let mut seen = HashSet::new();
        for wallet in &self.wallets {
            if wallet.address.trim().is_empty() {
                anyhow::bail!("Wallet address must not be empty");
            }
            if !seen.insert(wallet.address.as_str()) {
                anyhow::bail!("Wallet {} is listed more than once", wallet.address);
            }
        }

        if self.token_contract.is_empty() {
            anyhow::bail!("token_contract must not be empty");
        }
        if self.page_size == 0 {
            anyhow::bail!("page_size must be at least 1");
        }
        if self.max_pages == 0 {
            anyhow::bail!("max_pages must be at least 1");
        }
        if self.page_size.checked_mul(self.max_pages).is_none() {
            anyhow::bail!("page_size * max_pages must fit a 32-bit feed offset");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.lock_stale_after_secs != 0 {
            let worst_case = self.worst_case_pass();
            if Duration::from_secs(self.lock_stale_after_secs) <= worst_case {
                anyhow::bail!(
                    "lock_stale_after_secs ({}) must be 0 or exceed the longest possible pass ({}s)",
                    self.lock_stale_after_secs,
                    worst_case.as_secs()
                );
            }
        }
        if self.dedup_prune_keep >= self.dedup_prune_threshold {
            anyhow::bail!(
                "dedup_prune_keep ({}) must be below dedup_prune_threshold ({})",
                self.dedup_prune_keep,
                self.dedup_prune_threshold
            );
        }
        if !(-12..=14).contains(&self.display_utc_offset_hours) {
            anyhow::bail!("display_utc_offset_hours must be between -12 and 14");
        }

        match self.notifier {
            NotifierMode::Telegram => {
                if self.telegram_bot_token.is_none() || self.telegram_chat_id.is_none() {
                    anyhow::bail!(
                        "telegram_bot_token and telegram_chat_id are required when notifier = telegram"
                    );
                }
            }
            NotifierMode::Log => {}
        }

        Ok(())
    }

    /// Upper bound on the duration of one pass.
    ///
    /// Every page of every wallet may use all attempts, each running into
    /// the request timeout, with the full backoff and jitter between them.
    /// Server-requested `Retry-After` waits are not bounded and not included.
    pub fn worst_case_pass(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let timeouts = Duration::from_secs(self.request_timeout_secs).saturating_mul(attempts);

        let doublings = 2u32.saturating_pow(self.max_retries).saturating_sub(1);
        let backoff = Duration::from_millis(self.retry_base_delay_ms).saturating_mul(doublings);
        let jitter = Duration::from_millis(self.retry_jitter_ms).saturating_mul(self.max_retries);

        let per_page = timeouts.saturating_add(backoff).saturating_add(jitter);
        let wallets = u32::try_from(self.wallets.len()).unwrap_or(u32::MAX);
        let pages = self.max_pages.saturating_mul(wallets);
        let pauses = Duration::from_millis(self.wallet_pause_ms).saturating_mul(wallets.saturating_sub(1));

        per_page.saturating_mul(pages).saturating_add(pauses)
    }

    /// Look up a tracked wallet by address.
    pub fn wallet(&self, address: &str) -> Option<&TrackedWallet> {
        self.wallets.iter().find(|w| w.address == address)
    }
}
