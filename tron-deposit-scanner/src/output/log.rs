//! Log notifier.
//!
//! Writes alerts through `tracing`, for deployments without a chat channel.

use super::Notifier;
use async_trait::async_trait;

/// Notifier that logs each alert at info level.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        tracing::info!(target: "deposit_alert", "{}", text);
        Ok(())
    }
}
