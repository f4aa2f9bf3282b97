//! GovSG channel adapter (WhatsApp Business graph-style API)

use async_trait::async_trait;
use postman_common::types::ChannelType;
use postman_storage::models::{CampaignMessage, Credential};
use tracing::debug;

use super::{classify_response, is_e164, ChannelAdapter, SendError};

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v16.0";

/// GovSG (WhatsApp) channel adapter
pub struct GovsgChannel {
    http: reqwest::Client,
    base_url: String,
}

impl GovsgChannel {
    /// Create a GovSG channel
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
            message: format!("GovSG credential missing '{}'", key),
            retryable: false,
        })
    }
}

#[async_trait]
impl ChannelAdapter for GovsgChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Govsg
    }

    fn validate_recipient(&self, recipient: &str) -> bool {
        is_e164(recipient)
    }

    async fn send(
        &self,
        message: &CampaignMessage,
        credential: &Credential,
    ) -> Result<String, SendError> {
        let api_token = Self::secret(credential, "api_token")?;
        let phone_number_id = Self::secret(credential, "phone_number_id")?;

        let template = message
            .params
            .get("template")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let language = message
            .params
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("en");

        let url = format!("{}/{}/messages", self.base_url, phone_number_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_token)
            .json(&serde_json::json!({
                "messaging_product": "whatsapp",
                "to": message.recipient,
                "type": "template",
                "template": {
                    "name": template,
                    "language": {"code": language},
                },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &text, |b| {
                b.contains("recipient") || b.contains("131026")
            }));
        }

        let payload: serde_json::Value = response.json().await?;
        let wamid = payload
            .pointer("/messages/0/id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SendError::Provider {
                message: "GovSG response missing message id".to_string(),
                retryable: true,
            })?;

        debug!(recipient = %message.recipient, wamid, "GovSG message sent");
        Ok(wamid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> Credential {
        Credential {
            name: "govsg-1".to_string(),
            channel: "govsg".to_string(),
            secret: serde_json::json!({
                "api_token": "token",
                "phone_number_id": "1050",
            }),
            created_at: Utc::now(),
        }
    }

    fn message() -> CampaignMessage {
        CampaignMessage {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            recipient: "+6591234567".to_string(),
            params: serde_json::json!({"template": "appointment_reminder", "language": "en"}),
            message_id: None,
            dequeued_at: None,
            sent_at: None,
            delivered_at: None,
            errored_at: None,
            error_code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_recipient() {
        let c = GovsgChannel::new(reqwest::Client::new());
        assert!(c.validate_recipient("+6591234567"));
        assert!(!c.validate_recipient("user@example.com"));
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1050/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "wamid.abc123"}],
            })))
            .mount(&server)
            .await;

        let c = GovsgChannel::new(reqwest::Client::new()).with_base_url(server.uri());
        let id = c.send(&message(), &credential()).await.unwrap();
        assert_eq!(id, "wamid.abc123");
    }

    #[tokio::test]
    async fn test_send_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let c = GovsgChannel::new(reqwest::Client::new()).with_base_url(server.uri());
        let err = c.send(&message(), &credential()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
