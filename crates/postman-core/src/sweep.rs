//! Maintenance sweep
//!
//! One periodic task per process: close out quiesced campaigns (jobs to
//! Logged, counters recomputed, owner notified) and reclaim claims whose
//! worker stopped making progress. Both passes are idempotent SQL, so
//! overlapping sweeps across processes are harmless.

use std::time::Duration;

use postman_common::config::SweepConfig;
use postman_common::types::{CampaignId, ChannelType};
use postman_storage::repository::{CampaignRepository, JobRepository, StatisticRepository};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::stats::{CampaignSummary, Notifier};

/// Periodic close-out and stall-reclaim task
pub struct Sweeper {
    channels: Vec<ChannelType>,
    campaigns: CampaignRepository,
    jobs: JobRepository,
    statistics: StatisticRepository,
    notifier: Notifier,
    interval: Duration,
    stall_window_secs: u64,
}

impl Sweeper {
    /// Create a sweeper covering the given channels
    pub fn new(
        pool: PgPool,
        channels: Vec<ChannelType>,
        notifier: Notifier,
        config: &SweepConfig,
    ) -> Self {
        Self {
            channels,
            campaigns: CampaignRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            statistics: StatisticRepository::new(pool),
            notifier,
            interval: Duration::from_secs(config.interval_secs),
            stall_window_secs: config.stall_window_secs,
        }
    }

    /// Sweep loop; runs until the task is aborted
    pub async fn run(&self) {
        info!(channels = ?self.channels, "Sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            for &channel in &self.channels {
                self.sweep_channel(channel).await;
            }
        }
    }

    /// One pass over one channel
    async fn sweep_channel(&self, channel: ChannelType) {
        match self.jobs.log_completed_jobs(channel).await {
            Ok(campaign_ids) => {
                for campaign_id in campaign_ids {
                    if let Err(e) = self.close_out(campaign_id, channel).await {
                        error!(%campaign_id, error = %e, "Campaign close-out failed");
                    }
                }
            }
            Err(e) => {
                error!(%channel, error = %e, "Log close-out pass failed");
            }
        }

        match self
            .jobs
            .reclaim_stalled(channel, self.stall_window_secs)
            .await
        {
            Ok(0) => {}
            Ok(reclaimed) => {
                warn!(%channel, reclaimed, "Reclaimed stalled jobs");
            }
            Err(e) => {
                error!(%channel, error = %e, "Stall reclaim pass failed");
            }
        }
    }

    /// Finalize a freshly logged campaign: recompute counters and notify
    /// the owner
    async fn close_out(
        &self,
        campaign_id: CampaignId,
        channel: ChannelType,
    ) -> postman_common::Result<()> {
        let stat = self.statistics.recompute(campaign_id, channel).await?;

        let campaign = match self.campaigns.get(campaign_id).await? {
            Some(c) => c,
            None => {
                debug!(%campaign_id, "Campaign row gone before close-out");
                return Ok(());
            }
        };

        info!(
            %campaign_id,
            sent = stat.sent,
            errored = stat.errored,
            invalid = stat.invalid,
            unsent = stat.unsent,
            "Campaign logged"
        );

        if let Some(owner_email) = self.campaigns.owner_email(campaign_id).await? {
            let summary = CampaignSummary::from_statistic(campaign.name, &stat);
            self.notifier.notify_owner(&owner_email, &summary).await;
        } else {
            debug!(%campaign_id, "No owner email on record, skipping notification");
        }

        Ok(())
    }
}
