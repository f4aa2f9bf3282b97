//! Telegram channel adapter (Bot API)

use async_trait::async_trait;
use postman_common::types::ChannelType;
use postman_storage::models::{CampaignMessage, Credential};
use tracing::debug;

use super::{classify_response, ChannelAdapter, SendError};

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Telegram channel adapter
pub struct TelegramChannel {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramChannel {
    /// Create a Telegram channel
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the provider base URL (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Telegram
    }

    /// Recipients are numeric chat ids (bot subscribers)
    fn validate_recipient(&self, recipient: &str) -> bool {
        let digits = recipient.strip_prefix('-').unwrap_or(recipient);
        !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
    }

    async fn send(
        &self,
        message: &CampaignMessage,
        credential: &Credential,
    ) -> Result<String, SendError> {
        let bot_token = credential
            .secret_str("bot_token")
            .ok_or_else(|| SendError::Provider {
                message: "Telegram credential missing 'bot_token'".to_string(),
                retryable: false,
            })?;

        let text = message
            .params
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let url = format!("{}/bot{}/sendMessage", self.base_url, bot_token);

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": message.recipient,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &text, |b| {
                b.contains("chat not found") || b.contains("bot was blocked")
            }));
        }

        let payload: serde_json::Value = response.json().await?;
        let telegram_message_id = payload
            .pointer("/result/message_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| SendError::Provider {
                message: "Telegram response missing message_id".to_string(),
                retryable: true,
            })?;

        debug!(chat_id = %message.recipient, telegram_message_id, "Telegram message sent");
        Ok(telegram_message_id.to_string())
    }
}
