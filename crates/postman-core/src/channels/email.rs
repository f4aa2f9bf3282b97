//! Email channel adapter (SMTP via lettre)

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials as SmtpCredentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use postman_common::config::SmtpConfig;
use postman_common::types::ChannelType;
use postman_storage::models::{CampaignMessage, Credential};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelAdapter, SendError};

/// Email channel adapter
///
/// The relay defaults come from configuration; a credential may override
/// host, port, username, and password per campaign.
pub struct EmailChannel {
    defaults: SmtpConfig,
}

impl EmailChannel {
    /// Create an email channel with relay defaults
    pub fn new(defaults: SmtpConfig) -> Self {
        Self { defaults }
    }

    fn build_email(&self, message: &CampaignMessage) -> Result<Message, SendError> {
        let to: Mailbox = message
            .recipient
            .parse()
            .map_err(|e| SendError::InvalidRecipient(format!("{}: {}", message.recipient, e)))?;

        let from_address = message
            .params
            .get("from")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.defaults.notify_from);
        let from: Mailbox = from_address.parse().map_err(|e| SendError::Provider {
            message: format!("Invalid from address: {}", e),
            retryable: false,
        })?;

        let subject = message
            .params
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let body = message
            .params
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| SendError::Provider {
                message: format!("Failed to build email: {}", e),
                retryable: false,
            })
    }

    fn build_transport(
        &self,
        credential: &Credential,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let host = credential
            .secret_str("host")
            .unwrap_or(&self.defaults.host)
            .to_string();
        let port = credential
            .secret
            .get("port")
            .and_then(|v| v.as_u64())
            .map(|p| p as u16)
            .unwrap_or(self.defaults.port);

        let builder = if self.defaults.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host).map_err(|e| {
                SendError::Provider {
                    message: format!("Failed to create SMTP transport: {}", e),
                    retryable: true,
                }
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
        };

        let mut builder = builder.port(port);

        let username = credential
            .secret_str("username")
            .map(String::from)
            .or_else(|| self.defaults.username.clone());
        let password = credential
            .secret_str("password")
            .map(String::from)
            .or_else(|| self.defaults.password.clone());
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(SmtpCredentials::new(username, password));
        }

        Ok(builder.timeout(Some(Duration::from_secs(30))).build())
    }
}

#[async_trait]
impl ChannelAdapter for EmailChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn validate_recipient(&self, recipient: &str) -> bool {
        let parts: Vec<&str> = recipient.splitn(2, '@').collect();
        parts.len() == 2 && !parts[0].is_empty() && parts[1].contains('.')
    }

    async fn send(
        &self,
        message: &CampaignMessage,
        credential: &Credential,
    ) -> Result<String, SendError> {
        let email = self.build_email(message)?;
        let mailer = self.build_transport(credential)?;

        match mailer.send(email).await {
            Ok(_) => {
                debug!(recipient = %message.recipient, "Email accepted by relay");
                // SMTP relays do not return a provider id; synthesize one
                Ok(format!("<{}@postman>", Uuid::new_v4()))
            }
            Err(e) => {
                let error_str = e.to_string();
                if error_str.contains("550")
                    || error_str.contains("5.1.1")
                    || error_str.contains("User unknown")
                {
                    Err(SendError::InvalidRecipient(error_str))
                } else if error_str.contains("timed out") {
                    Err(SendError::Timeout)
                } else if error_str.contains("421") || error_str.contains("too many") {
                    Err(SendError::RateLimited)
                } else {
                    Err(SendError::Provider {
                        message: error_str,
                        retryable: true,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> EmailChannel {
        EmailChannel::new(SmtpConfig::default())
    }

    #[test]
    fn test_validate_recipient() {
        let c = channel();
        assert!(c.validate_recipient("user@agency.gov.sg"));
        assert!(!c.validate_recipient("user"));
        assert!(!c.validate_recipient("@agency.gov.sg"));
        assert!(!c.validate_recipient("user@localhost"));
    }

    #[test]
    fn test_build_email_rejects_bad_recipient() {
        let c = channel();
        let message = CampaignMessage {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            recipient: "not an address".to_string(),
            params: serde_json::json!({"subject": "Hi", "body": "<p>Hi</p>"}),
            message_id: None,
            dequeued_at: None,
            sent_at: None,
            delivered_at: None,
            errored_at: None,
            error_code: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let err = c.build_email(&message).unwrap_err();
        assert!(matches!(err, SendError::InvalidRecipient(_)));
    }
}
