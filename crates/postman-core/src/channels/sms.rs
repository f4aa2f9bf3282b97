//! SMS channel adapter (Twilio-style REST API)

use async_trait::async_trait;
use postman_common::types::ChannelType;
use postman_storage::models::{CampaignMessage, Credential};
use tracing::debug;

use super::{classify_response, is_e164, ChannelAdapter, SendError};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

/// SMS channel adapter
pub struct SmsChannel {
    http: reqwest::Client,
    base_url: String,
}

impl SmsChannel {
    /// Create an SMS channel
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

    fn secret<'a>(credential: &'a Credential, key: &str) -> Result<&'a str, SendError> {
        credential.secret_str(key).ok_or_else(|| SendError::Provider {
            message: format!("SMS credential missing '{}'", key),
            retryable: false,
        })
    }
}

#[async_trait]
impl ChannelAdapter for SmsChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Sms
    }

    fn validate_recipient(&self, recipient: &str) -> bool {
        is_e164(recipient)
    }

    async fn send(
        &self,
        message: &CampaignMessage,
        credential: &Credential,
    ) -> Result<String, SendError> {
        let account_sid = Self::secret(credential, "account_sid")?;
        let auth_token = Self::secret(credential, "auth_token")?;
        let from = Self::secret(credential, "from")?;

        let body = message
            .params
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, account_sid
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(account_sid, Some(auth_token))
            .form(&[
                ("To", message.recipient.as_str()),
                ("From", from),
                ("Body", body),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // 21211: invalid 'To' number
            return Err(classify_response(status, &text, |b| b.contains("21211")));
        }

        let payload: serde_json::Value = response.json().await?;
        let sid = payload
            .get("sid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SendError::Provider {
                message: "SMS response missing sid".to_string(),
                retryable: true,
            })?;

        debug!(recipient = %message.recipient, sid, "SMS accepted by provider");
        Ok(sid.to_string())
    }
}
