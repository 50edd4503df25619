//! Notifiers for newly recorded deposits.
//!
//! This module provides different ways to announce a deposit:
//! - Log (tracing output)
//! - Telegram (Bot API `sendMessage`)
//!
//! Alerts are best-effort: the pipeline logs a failed send and moves on.

mod log;
mod telegram;

pub use self::log::LogNotifier;
pub use self::telegram::TelegramNotifier;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::config::{NotifierMode, ScannerConfig};
use crate::deposit::DepositRecord;

/// Trait for deposit alert transports.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one formatted (Telegram HTML) alert.
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Create a notifier based on configuration.
pub fn create_notifier(config: &ScannerConfig) -> anyhow::Result<Box<dyn Notifier>> {
    match config.notifier {
        NotifierMode::Log => Ok(Box::new(LogNotifier::new())),
        NotifierMode::Telegram => {
            let token = config
                .telegram_bot_token
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("telegram_bot_token required for telegram notifier"))?;
            let chat_id = config
                .telegram_chat_id
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("telegram_chat_id required for telegram notifier"))?;
            Ok(Box::new(TelegramNotifier::new(token, chat_id)?))
        }
    }
}

/// Render the alert for a newly recorded deposit.
pub fn format_deposit_alert(wallet_name: &str, deposit: &DepositRecord, utc_offset_hours: i32) -> String {
    format!(
        "<b>New deposit received</b>\n\
         ━━━━━━━━━━━━━━━━━━\n\
         <b>Account:</b> {}\n\
         <b>Amount:</b> <b><u>{} {}</u></b>\n\
         ━━━━━━━━━━━━━━━━━━\n\
         <b>From:</b> <code>{}</code>\n\
         <b>Time:</b> {}",
        escape_html(wallet_name),
        deposit.amount,
        escape_html(&deposit.token_symbol),
        escape_html(&short_address(&deposit.from_address, 6, 6)),
        format_local_time(deposit.block_ts, utc_offset_hours),
    )
}

/// Keep the first `start` and last `end` characters of an address.
pub fn short_address(address: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= start + end {
        return address.to_string();
    }
    let head: String = chars[..start].iter().collect();
    let tail: String = chars[chars.len() - end..].iter().collect();
    format!("{}......{}", head, tail)
}

/// Format a millisecond timestamp as `YYYY-MM-DD HH:MM:SS UTC+H`.
pub fn format_local_time(ts_ms: u64, utc_offset_hours: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());

    match DateTime::from_timestamp_millis(ts_ms as i64) {
        Some(dt) => format!(
            "{} UTC{:+}",
            dt.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S"),
            utc_offset_hours
        ),
        None => "unknown".to_string(),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
