//! Telegram notifier.
//!
//! Posts alerts to a chat through the Bot API `sendMessage` method.

use super::Notifier;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Handler that sends alerts to a Telegram chat.
pub struct TelegramNotifier {
    /// HTTP client
    client: Client,
    /// Bot API base URL
    api_base: String,
    /// Bot token
    bot_token: String,
    /// Target chat
    chat_id: String,
    /// Number of retries on failure
    max_retries: u32,
    /// Retry delay
    retry_delay: Duration,
}

impl TelegramNotifier {
    /// Create a new Telegram notifier.
    pub fn new(bot_token: &str, chat_id: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Override the retry settings.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Point the notifier at a different Bot API host.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    async fn send_with_retry(&self, text: &str) -> anyhow::Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::warn!("Telegram retry {}", attempt);
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.send_once(text).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown Telegram error")))
    }

    async fn send_once(&self, text: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            })
            .send()
            .await
            // The request URL carries the bot token.
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Telegram returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        tracing::debug!("Sent Telegram alert to chat {}", self.chat_id);

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        if text.is_empty() {
            anyhow::bail!("Refusing to send an empty Telegram message");
        }
        self.send_with_retry(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let notifier = TelegramNotifier::new("123:abc", "-100").unwrap();
        assert_eq!(
            notifier.endpoint(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );

        let notifier = notifier.with_api_base("http://localhost:8081/");
        assert_eq!(notifier.endpoint(), "http://localhost:8081/bot123:abc/sendMessage");
    }

    #[test]
    fn test_payload_shape() {
        let payload = serde_json::to_value(SendMessage {
            chat_id: "-100",
            text: "<b>hi</b>",
            parse_mode: "HTML",
            disable_web_page_preview: true,
        })
        .unwrap();

        assert_eq!(payload["chat_id"], "-100");
        assert_eq!(payload["parse_mode"], "HTML");
        assert_eq!(payload["disable_web_page_preview"], true);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let notifier = TelegramNotifier::new("123:abc", "-100").unwrap();
        assert!(notifier.send("").await.is_err());
    }

    #[tokio::test]
    async fn test_send_error_hides_bot_token() {
        let notifier = TelegramNotifier::new("123456:SECRET_TOKEN", "-100")
            .unwrap()
            .with_api_base("http://127.0.0.1:1")
            .with_retries(0, Duration::ZERO);

        let err = notifier.send("hi").await.unwrap_err();
        let text = format!("{:#} {:?}", err, err);

        assert!(!text.contains("SECRET_TOKEN"), "token leaked: {}", text);
    }
}
