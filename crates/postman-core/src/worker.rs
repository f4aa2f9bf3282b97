//! Worker dispatch loop
//!
//! Each worker serves one channel: it claims a job, dequeues one batch
//! of `send_rate` messages per second, fans the batch out to the
//! provider under a concurrency cap, and records every outcome. The
//! claim is only released by finishing the job; a worker that dies
//! mid-job leaves its claim for the stall-reclaim sweep.

use std::sync::Arc;
use std::time::Duration;

use postman_common::config::WorkerConfig;
use postman_common::types::{ChannelType, JobStatus, MessageId, WorkerId};
use postman_storage::models::{CampaignMessage, Credential, Job};
use postman_storage::repository::{
    CampaignRepository, CredentialStore, JobRepository, MessageRepository,
};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::channels::{ChannelAdapter, SendError};
use crate::halt::{should_halt, HaltPolicy};

/// Tunables for the dispatch loop, resolved from configuration once
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Delay between claim polls while idle
    pub poll_interval: Duration,

    /// Maximum concurrent provider calls within one batch
    pub batch_concurrency: usize,

    /// Hard timeout per provider call
    pub send_timeout: Duration,

    /// Attempts for each outcome write before the job is abandoned
    pub db_write_attempts: u32,

    /// Base delay for outcome-write backoff
    pub db_backoff_base: Duration,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_concurrency: config.batch_concurrency.max(1),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            db_write_attempts: config.db_write_attempts.max(1),
            db_backoff_base: Duration::from_millis(config.db_backoff_base_ms),
        }
    }
}

/// A single worker slot for one channel
pub struct Worker {
    worker_id: WorkerId,
    adapter: Arc<dyn ChannelAdapter>,
    credentials: Arc<dyn CredentialStore>,
    campaigns: CampaignRepository,
    jobs: JobRepository,
    messages: MessageRepository,
    halt_policy: HaltPolicy,
    settings: WorkerSettings,
}

impl Worker {
    /// Create a worker slot
    pub fn new(
        worker_id: impl Into<WorkerId>,
        pool: PgPool,
        adapter: Arc<dyn ChannelAdapter>,
        credentials: Arc<dyn CredentialStore>,
        halt_policy: HaltPolicy,
        settings: WorkerSettings,
    ) -> Self {
        let channel = adapter.channel_type();
        Self {
            worker_id: worker_id.into(),
            adapter,
            credentials,
            campaigns: CampaignRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            messages: MessageRepository::new(pool, channel),
            halt_policy,
            settings,
        }
    }

    fn channel(&self) -> ChannelType {
        self.adapter.channel_type()
    }

    /// Claim-poll loop; runs until the task is aborted
    pub async fn run(&self) {
        info!(
            worker_id = %self.worker_id,
            channel = %self.channel(),
            "Worker started"
        );

        loop {
            match self
                .jobs
                .claim_next_ready(self.channel(), &self.worker_id)
                .await
            {
                Ok(Some(job)) => {
                    info!(
                        worker_id = %self.worker_id,
                        job_id = %job.id,
                        campaign_id = %job.campaign_id,
                        send_rate = job.send_rate,
                        "Claimed job"
                    );
                    if let Err(e) = self.process_job(&job).await {
                        // The claim stays in place; the stall sweep will
                        // return the job to Ready if no progress follows.
                        error!(
                            worker_id = %self.worker_id,
                            job_id = %job.id,
                            error = %e,
                            "Job processing aborted"
                        );
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
                Err(e) => {
                    warn!(worker_id = %self.worker_id, error = %e, "Job claim failed");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }
    }

    /// Drive one claimed job to Sent (or observe its stop)
    async fn process_job(&self, job: &Job) -> postman_common::Result<()> {
        let campaign = self
            .campaigns
            .get(job.campaign_id)
            .await?
            .ok_or(postman_common::Error::NotFound(format!(
                "campaign {} for job {}",
                job.campaign_id, job.id
            )))?;

        let cred_name = match campaign.cred_name.as_deref() {
            Some(name) => name,
            None => {
                // Enqueue checked this; a campaign edited afterwards is
                // unsendable, so stop its jobs rather than spin.
                warn!(campaign_id = %campaign.id, "Campaign lost its credential, stopping jobs");
                self.jobs.stop_campaign_jobs(campaign.id).await?;
                return Ok(());
            }
        };

        let credential = match self.credentials.get(cred_name).await {
            Ok(c) => c,
            Err(e) => {
                error!(
                    campaign_id = %campaign.id,
                    cred_name,
                    error = %e,
                    "Credential lookup failed, stopping campaign jobs"
                );
                self.jobs.stop_campaign_jobs(campaign.id).await?;
                return Ok(());
            }
        };

        if !self.jobs.mark_sending(job.id, &self.worker_id).await? {
            // Stopped or reclaimed between claim and start
            debug!(job_id = %job.id, "Job no longer ours, skipping");
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.batch_concurrency));
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut sent: u64 = 0;
        let mut errored: u64 = 0;
        let mut invalid: u64 = 0;

        loop {
            ticker.tick().await;

            // Cooperative stop: campaign stop and stall reclaim both
            // rewrite the row out from under us. A reclaimed job may
            // already be claimed by another worker and back in Sending,
            // so the claim holder is checked, not just the status.
            let state = self.jobs.claim_state(job.id).await?;
            if !claim_is_live(state.as_ref(), &self.worker_id) {
                info!(
                    job_id = %job.id,
                    status = state.as_ref().map(|(s, _)| s.as_str()).unwrap_or("gone"),
                    "Job claim lost, releasing"
                );
                return Ok(());
            }

            let batch = self
                .with_db_retry("dequeue batch", || {
                    self.messages
                        .fetch_unsent_batch(job.campaign_id, i64::from(job.send_rate))
                })
                .await?;

            if batch.is_empty() {
                self.with_db_retry("mark job sent", || {
                    self.jobs.mark_sent(job.id, &self.worker_id)
                })
                .await?;
                info!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    campaign_id = %job.campaign_id,
                    sent,
                    errored,
                    invalid,
                    "Job finished"
                );
                return Ok(());
            }

            debug!(job_id = %job.id, batch_size = batch.len(), "Dispatching batch");

            for (message_id, outcome) in self.send_batch(batch, &credential, &semaphore).await {
                match outcome {
                    Ok(provider_id) => {
                        self.with_db_retry("record sent", || {
                            self.messages.record_sent(message_id, &provider_id)
                        })
                        .await?;
                        sent += 1;
                    }
                    Err(e) => {
                        let code = e.error_code();
                        self.with_db_retry("record error", || {
                            self.messages.record_error(message_id, code)
                        })
                        .await?;
                        if matches!(e, SendError::InvalidRecipient(_)) {
                            invalid += 1;
                        } else {
                            errored += 1;
                        }
                        debug!(%message_id, code, "Send failed");
                    }
                }
            }

            let counts = self.messages.counts(job.campaign_id).await?;
            let attempted = counts.sent + counts.errored;
            if should_halt(counts.errored, attempted, &self.halt_policy) {
                warn!(
                    campaign_id = %job.campaign_id,
                    errored = counts.errored,
                    attempted,
                    "Error rate over halt thresholds, halting campaign"
                );
                self.campaigns.set_halted(job.campaign_id, true).await?;
                self.jobs.stop_campaign_jobs(job.campaign_id).await?;
                return Ok(());
            }
        }
    }

    /// Fan one batch out to the provider under the concurrency cap
    ///
    /// Invalid recipients are failed locally without a provider call.
    /// Each send runs under a hard timeout; outcomes come back in batch
    /// order paired with the message id.
    async fn send_batch(
        &self,
        batch: Vec<CampaignMessage>,
        credential: &Credential,
        semaphore: &Arc<Semaphore>,
    ) -> Vec<(MessageId, Result<String, SendError>)> {
        let mut handles = Vec::with_capacity(batch.len());
        let mut outcomes = Vec::with_capacity(batch.len());

        for message in batch {
            if !self.adapter.validate_recipient(&message.recipient) {
                outcomes.push((
                    message.id,
                    Err(SendError::InvalidRecipient(message.recipient.clone())),
                ));
                continue;
            }

            let permit = match Arc::clone(semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    // The semaphore is never closed while the worker runs
                    outcomes.push((
                        message.id,
                        Err(SendError::Provider {
                            message: "send slot pool closed".to_string(),
                            retryable: true,
                        }),
                    ));
                    continue;
                }
            };

            let adapter = Arc::clone(&self.adapter);
            let credential = credential.clone();
            let send_timeout = self.settings.send_timeout;
            let message_id = message.id;

            let handle = tokio::spawn(async move {
                let result =
                    match tokio::time::timeout(send_timeout, adapter.send(&message, &credential))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(SendError::Timeout),
                    };
                drop(permit);
                result
            });
            handles.push((message_id, handle));
        }

        for (message_id, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SendError::Provider {
                    message: format!("send task failed: {}", e),
                    retryable: true,
                }),
            };
            outcomes.push((message_id, outcome));
        }

        outcomes
    }

    /// Retry a database write with exponential backoff
    ///
    /// Outcome writes must not be lost silently; after the configured
    /// attempts the error propagates and the job claim is abandoned to
    /// the stall sweep.
    async fn with_db_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, sqlx::Error>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.settings.db_write_attempts => {
                    error!(
                        worker_id = %self.worker_id,
                        what,
                        attempts = attempt,
                        error = %e,
                        "Database write retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff_delay(attempt, self.settings.db_backoff_base);
                    warn!(
                        worker_id = %self.worker_id,
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Database write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Whether this worker still holds a live claim on the job
///
/// Both conditions matter: after a stall reclaim the job can be back in
/// Sending under a different worker, and after a stop it is Stopped
/// under the same one.
fn claim_is_live(state: Option<&(String, Option<String>)>, worker_id: &str) -> bool {
    match state {
        Some((status, Some(owner))) => {
            JobStatus::parse(status) == Some(JobStatus::Sending) && owner.as_str() == worker_id
        }
        _ => false,
    }
}

/// Backoff delay for the given attempt (1-based), doubling from the base
/// and capped at 30 seconds
fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    (base * factor).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let base = Duration::from_millis(200);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(800));
        assert_eq!(backoff_delay(5, base), Duration::from_millis(3200));
        assert_eq!(backoff_delay(20, base), Duration::from_secs(30));
        assert_eq!(backoff_delay(1000, base), Duration::from_secs(30));
    }

    #[test]
    fn test_settings_from_config() {
        let config = WorkerConfig::default();
        let settings = WorkerSettings::from(&config);
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.batch_concurrency, 10);
        assert_eq!(settings.send_timeout, Duration::from_secs(30));
        assert_eq!(settings.db_write_attempts, 5);
        assert_eq!(settings.db_backoff_base, Duration::from_millis(200));
    }

    fn state(status: &str, owner: Option<&str>) -> Option<(String, Option<String>)> {
        Some((status.to_string(), owner.map(|s| s.to_string())))
    }

    #[test]
    fn test_claim_live_for_owning_worker() {
        assert!(claim_is_live(state("sending", Some("w-1")).as_ref(), "w-1"));
    }

    #[test]
    fn test_claim_lost_when_reclaimed_by_other_worker() {
        // Stall reclaim can hand the job to a second worker that drives
        // it back to Sending; the first worker must not keep batching
        assert!(!claim_is_live(state("sending", Some("w-2")).as_ref(), "w-1"));
    }

    #[test]
    fn test_claim_lost_on_stop_or_reclaim() {
        assert!(!claim_is_live(state("stopped", Some("w-1")).as_ref(), "w-1"));
        assert!(!claim_is_live(state("ready", None).as_ref(), "w-1"));
        assert!(!claim_is_live(None, "w-1"));
    }

    #[test]
    fn test_settings_floor_zeroes() {
        let config = WorkerConfig {
            batch_concurrency: 0,
            db_write_attempts: 0,
            ..WorkerConfig::default()
        };
        let settings = WorkerSettings::from(&config);
        assert_eq!(settings.batch_concurrency, 1);
        assert_eq!(settings.db_write_attempts, 1);
    }
}
