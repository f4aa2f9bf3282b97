//! Campaign completion summaries and owner notification
//!
//! When the close-out sweep logs a campaign, its counters are recomputed
//! and the owner gets a summary email. Notification is fire-and-forget:
//! a relay failure is logged and never blocks the sweep.

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials as SmtpCredentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use postman_common::config::SmtpConfig;
use postman_storage::models::Statistic;
use std::time::Duration;
use tracing::{info, warn};

/// Final counters of a completed campaign
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub campaign_name: String,
    pub unsent: i64,
    pub sent: i64,
    pub errored: i64,
    pub invalid: i64,
}

impl CampaignSummary {
    /// Build a summary from recomputed statistics
    pub fn from_statistic(campaign_name: impl Into<String>, stat: &Statistic) -> Self {
        Self {
            campaign_name: campaign_name.into(),
            unsent: stat.unsent,
            sent: stat.sent,
            errored: stat.errored,
            invalid: stat.invalid,
        }
    }

    fn subject(&self) -> String {
        format!("Campaign '{}' has completed", self.campaign_name)
    }

    fn body(&self) -> String {
        format!(
            "Your campaign '{}' has finished sending.\n\n\
             Sent: {}\n\
             Errored: {}\n\
             Invalid recipients: {}\n\
             Unsent: {}\n",
            self.campaign_name, self.sent, self.errored, self.invalid, self.unsent
        )
    }
}

/// Owner notifier over the configured SMTP relay
pub struct Notifier {
    smtp: SmtpConfig,
}

impl Notifier {
    /// Create a notifier from relay configuration
    pub fn new(smtp: SmtpConfig) -> Self {
        Self { smtp }
    }

    /// Email the campaign owner a completion summary
    ///
    /// Failures are logged at warn and swallowed; close-out must not
    /// depend on the relay being up.
    pub async fn notify_owner(&self, owner_email: &str, summary: &CampaignSummary) {
        match self.send_summary(owner_email, summary).await {
            Ok(()) => {
                info!(
                    owner = owner_email,
                    campaign = %summary.campaign_name,
                    "Completion notification sent"
                );
            }
            Err(e) => {
                warn!(
                    owner = owner_email,
                    campaign = %summary.campaign_name,
                    error = %e,
                    "Completion notification failed"
                );
            }
        }
    }

    async fn send_summary(&self, owner_email: &str, summary: &CampaignSummary) -> anyhow::Result<()> {
        let to: Mailbox = owner_email.parse()?;
        let from: Mailbox = self.smtp.notify_from.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(summary.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(summary.body())?;

        self.build_transport()?.send(email).await?;
        Ok(())
    }

    fn build_transport(&self) -> anyhow::Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.smtp.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.smtp.host)
        };

        let mut builder = builder.port(self.smtp.port);
        if let (Some(username), Some(password)) =
            (self.smtp.username.clone(), self.smtp.password.clone())
        {
            builder = builder.credentials(SmtpCredentials::new(username, password));
        }

        Ok(builder.timeout(Some(Duration::from_secs(30))).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_summary_from_statistic() {
        let stat = Statistic {
            campaign_id: Uuid::new_v4(),
            unsent: 3,
            sent: 120,
            errored: 2,
            invalid: 1,
            updated_at: Utc::now(),
        };
        let summary = CampaignSummary::from_statistic("flu-jab-2026", &stat);
        assert_eq!(summary.sent, 120);
        assert_eq!(summary.errored, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.unsent, 3);

        assert_eq!(summary.subject(), "Campaign 'flu-jab-2026' has completed");
        let body = summary.body();
        assert!(body.contains("Sent: 120"));
        assert!(body.contains("Invalid recipients: 1"));
    }
}
