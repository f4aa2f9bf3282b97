//! Channel adapters
//!
//! One generic send pipeline parameterized by `ChannelAdapter`; the
//! adapters differ only in recipient validation and the provider call.

pub mod email;
pub mod govsg;
pub mod sms;
pub mod telegram;

pub use email::EmailChannel;
pub use govsg::GovsgChannel;
pub use sms::SmsChannel;
pub use telegram::TelegramChannel;

use async_trait::async_trait;
use postman_common::types::ChannelType;
use postman_storage::models::{CampaignMessage, Credential};
use thiserror::Error;

/// Typed send failure
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Provider rate limit hit")]
    RateLimited,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Send timed out")]
    Timeout,
}

impl SendError {
    /// Whether an operator retry should re-pick the message
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::RateLimited | SendError::Timeout => true,
            SendError::InvalidRecipient(_) => false,
            SendError::Provider { retryable, .. } => *retryable,
        }
    }

    /// Stable error code recorded on the message row
    pub fn error_code(&self) -> &'static str {
        match self {
            SendError::RateLimited => "rate_limited",
            SendError::InvalidRecipient(_) => "invalid_recipient",
            SendError::Provider { retryable: true, .. } => "provider_error",
            SendError::Provider { retryable: false, .. } => "provider_permanent",
            SendError::Timeout => "timeout",
        }
    }

    /// Error codes excluded from retry sweeps
    pub const PERMANENT_CODES: &'static [&'static str] =
        &["invalid_recipient", "provider_permanent"];
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SendError::Timeout
        } else {
            SendError::Provider {
                message: e.to_string(),
                retryable: true,
            }
        }
    }
}

/// Capability set a channel must provide to the dispatch loop
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter serves
    fn channel_type(&self) -> ChannelType;

    /// Whether the recipient identifier is well-formed for this channel
    fn validate_recipient(&self, recipient: &str) -> bool;

    /// Send one message through the provider, returning the provider
    /// message id
    async fn send(
        &self,
        message: &CampaignMessage,
        credential: &Credential,
    ) -> Result<String, SendError>;
}

/// E.164 phone number check, shared by the SMS and GovSG channels
pub(crate) fn is_e164(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Map an HTTP response status to a send error, with a provider-specific
/// invalid-recipient predicate applied to the response body
pub(crate) fn classify_response(
    status: reqwest::StatusCode,
    body: &str,
    invalid_recipient: impl Fn(&str) -> bool,
) -> SendError {
    if status.as_u16() == 429 {
        SendError::RateLimited
    } else if status.is_client_error() && invalid_recipient(body) {
        SendError::InvalidRecipient(body.to_string())
    } else {
        SendError::Provider {
            message: format!("{}: {}", status, body),
            retryable: status.is_server_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(SendError::RateLimited.error_code(), "rate_limited");
        assert_eq!(
            SendError::InvalidRecipient("x".into()).error_code(),
            "invalid_recipient"
        );
        assert_eq!(SendError::Timeout.error_code(), "timeout");
        assert_eq!(
            SendError::Provider {
                message: "503".into(),
                retryable: true
            }
            .error_code(),
            "provider_error"
        );
        assert_eq!(
            SendError::Provider {
                message: "blocked".into(),
                retryable: false
            }
            .error_code(),
            "provider_permanent"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SendError::RateLimited.is_retryable());
        assert!(SendError::Timeout.is_retryable());
        assert!(!SendError::InvalidRecipient("x".into()).is_retryable());

        // Permanent codes are exactly the non-retryable ones
        for code in SendError::PERMANENT_CODES {
            assert!(["invalid_recipient", "provider_permanent"].contains(code));
        }
    }

    #[test]
    fn test_is_e164() {
        assert!(is_e164("+6591234567"));
        assert!(is_e164("+14155552671"));
        assert!(!is_e164("6591234567"));
        assert!(!is_e164("+123"));
        assert!(!is_e164("+65abc34567"));
        assert!(!is_e164(""));
    }

    #[test]
    fn test_classify_response() {
        let e = classify_response(reqwest::StatusCode::TOO_MANY_REQUESTS, "", |_| false);
        assert!(matches!(e, SendError::RateLimited));

        let e = classify_response(reqwest::StatusCode::BAD_REQUEST, "chat not found", |b| {
            b.contains("chat not found")
        });
        assert!(matches!(e, SendError::InvalidRecipient(_)));

        let e = classify_response(reqwest::StatusCode::SERVICE_UNAVAILABLE, "down", |_| false);
        assert!(e.is_retryable());

        let e = classify_response(reqwest::StatusCode::FORBIDDEN, "denied", |_| false);
        assert!(!e.is_retryable());
    }
}
