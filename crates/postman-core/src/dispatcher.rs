//! Send dispatcher - campaign-level operations
//!
//! The operator-facing side of the send core: splitting a campaign into
//! rate-capped jobs, stopping a run, and retrying after failures. The
//! workers only ever see the jobs this module enqueues.

use postman_common::types::{CampaignId, JobId};
use postman_common::config::RateConfig;
use postman_common::{Error, Result};
use postman_storage::repository::{CampaignRepository, JobRepository, MessageRepository};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::channels::SendError;
use crate::splitter::{plan_jobs, SplitError};

/// Campaign-level send operations
#[derive(Clone)]
pub struct SendDispatcher {
    pool: PgPool,
    campaigns: CampaignRepository,
    jobs: JobRepository,
    rates: RateConfig,
}

impl SendDispatcher {
    /// Create a dispatcher
    pub fn new(pool: PgPool, rates: RateConfig) -> Self {
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            pool,
            rates,
        }
    }

    /// Split a campaign's requested rate into jobs and enqueue them
    ///
    /// The campaign must be valid, carry a credential, and not be
    /// halted. Returns the ids of the enqueued jobs. Job inserts are
    /// individual statements; a failure partway leaves the earlier jobs
    /// in place, which only means the campaign sends below the
    /// requested rate until retried.
    pub async fn split_and_enqueue(
        &self,
        campaign_id: CampaignId,
        requested_rate: u32,
    ) -> Result<Vec<JobId>> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or(Error::NotFound(format!("campaign {}", campaign_id)))?;

        if !campaign.is_sendable() {
            return Err(Error::CampaignNotSendable(campaign_id));
        }

        let channel = campaign
            .channel_type()
            .ok_or(Error::Channel(format!("unknown channel '{}'", campaign.channel)))?;

        let rates = plan_jobs(channel, requested_rate, &self.rates).map_err(|e| match e {
            SplitError::ZeroRate => Error::InvalidRate(requested_rate),
            SplitError::RateAboveCap { rate, .. } => Error::InvalidRate(rate),
        })?;

        let mut job_ids = Vec::with_capacity(rates.len());
        for rate in &rates {
            let job = self.jobs.insert(campaign_id, *rate as i32).await?;
            job_ids.push(job.id);
        }

        info!(
            %campaign_id,
            channel = %channel,
            requested_rate,
            jobs = job_ids.len(),
            rates = ?rates,
            "Campaign enqueued"
        );
        Ok(job_ids)
    }

    /// Stop a campaign's run
    ///
    /// Every non-Logged job flips to Stopped; workers observe the flip
    /// between batches and release. In-flight provider calls of the
    /// current batch still complete.
    pub async fn stop_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let stopped = self.jobs.stop_campaign_jobs(campaign_id).await?;
        info!(%campaign_id, stopped, "Campaign stopped");
        Ok(stopped)
    }

    /// Retry a campaign after a stop, halt, or partial failure
    ///
    /// Clears the halted flag, resets dequeue/error state on messages
    /// that never reached the provider (permanent failures stay put),
    /// and flips Stopped/Logged jobs back to Ready. Messages with a
    /// provider message id are never re-sent.
    pub async fn retry_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or(Error::NotFound(format!("campaign {}", campaign_id)))?;

        let channel = campaign
            .channel_type()
            .ok_or(Error::Channel(format!("unknown channel '{}'", campaign.channel)))?;

        if campaign.halted {
            self.campaigns.set_halted(campaign_id, false).await?;
            info!(%campaign_id, "Halted flag cleared for retry");
        }

        let messages = MessageRepository::new(self.pool.clone(), channel);
        let cleared = messages
            .clear_unsent_dequeued(campaign_id, SendError::PERMANENT_CODES)
            .await?;

        let requeued = self.jobs.requeue_for_retry(campaign_id).await?;
        if requeued == 0 {
            warn!(%campaign_id, "Retry requeued no jobs");
        }

        info!(%campaign_id, cleared, requeued, "Campaign retry enqueued");
        Ok(requeued)
    }
}
