//! Common types for Postman

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for jobs
pub type JobId = Uuid;

/// Unique identifier for campaign messages
pub type MessageId = Uuid;

/// Unique identifier for users
pub type UserId = Uuid;

/// Identifier for a worker slot (process + channel + slot index)
pub type WorkerId = String;

/// Messaging channel a campaign sends through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Email,
    Sms,
    Telegram,
    Govsg,
}

impl ChannelType {
    /// Stable string form used in database columns and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::Telegram => "telegram",
            ChannelType::Govsg => "govsg",
        }
    }

    /// Physical message table backing this channel
    pub fn message_table(&self) -> &'static str {
        match self {
            ChannelType::Email => "email_messages",
            ChannelType::Sms => "sms_messages",
            ChannelType::Telegram => "telegram_messages",
            ChannelType::Govsg => "govsg_messages",
        }
    }

    /// All supported channels
    pub fn all() -> [ChannelType; 4] {
        [
            ChannelType::Email,
            ChannelType::Sms,
            ChannelType::Telegram,
            ChannelType::Govsg,
        ]
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(ChannelType::Email),
            "sms" => Some(ChannelType::Sms),
            "telegram" => Some(ChannelType::Telegram),
            "govsg" => Some(ChannelType::Govsg),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::Validation(format!("Unknown channel type: {}", s)))
    }
}

/// Job lifecycle states
///
/// Ready -> Enqueued -> Sending -> Sent -> Logged, with Stopped reachable
/// from any non-terminal state and Stopped/Logged -> Ready via retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ready,
    Enqueued,
    Sending,
    Sent,
    Stopped,
    Logged,
}

impl JobStatus {
    /// Stable string form used in the jobs table
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Enqueued => "enqueued",
            JobStatus::Sending => "sending",
            JobStatus::Sent => "sent",
            JobStatus::Stopped => "stopped",
            JobStatus::Logged => "logged",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(JobStatus::Ready),
            "enqueued" => Some(JobStatus::Enqueued),
            "sending" => Some(JobStatus::Sending),
            "sent" => Some(JobStatus::Sent),
            "stopped" => Some(JobStatus::Stopped),
            "logged" => Some(JobStatus::Logged),
            _ => None,
        }
    }

    /// Logged is the only terminal state; Sent and Stopped still await
    /// delivery confirmations before the log sweep closes them out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Logged)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_channel_type_roundtrip() {
        for channel in ChannelType::all() {
            assert_eq!(ChannelType::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(ChannelType::parse("whatsapp"), None);
    }

    #[test]
    fn test_channel_message_tables_distinct() {
        let tables: std::collections::HashSet<_> =
            ChannelType::all().iter().map(|c| c.message_table()).collect();
        assert_eq!(tables.len(), 4);
    }

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Ready,
            JobStatus::Enqueued,
            JobStatus::Sending,
            JobStatus::Sent,
            JobStatus::Stopped,
            JobStatus::Logged,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Logged.is_terminal());
        assert!(!JobStatus::Sent.is_terminal());
        assert!(!JobStatus::Stopped.is_terminal());
    }
}
