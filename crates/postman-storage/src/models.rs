//! Database models

use chrono::{DateTime, Utc};
use postman_common::types::{CampaignId, ChannelType, MessageId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    /// Channel type, immutable after creation
    pub channel: String,
    pub user_id: UserId,
    /// Name of the credential used to reach the provider
    pub cred_name: Option<String>,
    /// Template and recipient list are compatible
    pub valid: bool,
    /// Set by the halt circuit breaker
    pub halted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get channel type enum
    pub fn channel_type(&self) -> Option<ChannelType> {
        ChannelType::parse(&self.channel)
    }

    /// A campaign is sendable when it is valid, has a credential, and
    /// has not been halted.
    pub fn is_sendable(&self) -> bool {
        self.valid && self.cred_name.is_some() && !self.halted
    }
}

/// Job model - one worker's slice of a campaign's send rate
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: postman_common::types::JobId,
    pub campaign_id: CampaignId,
    /// Claim marker; set while a worker holds the job, cleared on
    /// reclaim and at log close-out
    pub worker_id: Option<String>,
    /// Messages per second allotted to this job
    pub send_rate: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Campaign message model - one row per (campaign, recipient)
///
/// Each channel has its own physical table with this shape; the repository
/// is parameterized by channel and picks the table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignMessage {
    pub id: MessageId,
    pub campaign_id: CampaignId,
    /// Channel-specific recipient identifier (email address, E.164
    /// phone number, Telegram chat id)
    pub recipient: String,
    /// Hydrated template parameters
    pub params: serde_json::Value,
    /// Provider-assigned message id, null until sent
    pub message_id: Option<String>,
    pub dequeued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Written by inbound delivery callbacks, outside this subsystem
    pub delivered_at: Option<DateTime<Utc>>,
    pub errored_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregated campaign statistics, recomputed from message rows
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Statistic {
    pub campaign_id: CampaignId,
    pub unsent: i64,
    pub sent: i64,
    pub errored: i64,
    pub invalid: i64,
    pub updated_at: DateTime<Utc>,
}

/// Named provider credential
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    pub channel: String,
    /// Provider secret material (SMTP login, API keys, tokens)
    pub secret: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Read a string field out of the secret payload
    pub fn secret_str(&self, key: &str) -> Option<&str> {
        self.secret.get(key).and_then(|v| v.as_str())
    }
}

/// Per-campaign error/sent counts used by the halt circuit breaker
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCounts {
    pub unsent: i64,
    pub sent: i64,
    pub errored: i64,
    pub invalid: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn campaign(valid: bool, cred: Option<&str>, halted: bool) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            channel: "sms".to_string(),
            user_id: Uuid::new_v4(),
            cred_name: cred.map(|s| s.to_string()),
            valid,
            halted,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_sendable() {
        assert!(campaign(true, Some("twilio-1"), false).is_sendable());
        assert!(!campaign(false, Some("twilio-1"), false).is_sendable());
        assert!(!campaign(true, None, false).is_sendable());
        assert!(!campaign(true, Some("twilio-1"), true).is_sendable());
    }

    #[test]
    fn test_channel_type_parse() {
        let c = campaign(true, None, false);
        assert_eq!(c.channel_type(), Some(ChannelType::Sms));
    }
}
