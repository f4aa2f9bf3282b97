//! Postman - campaign send worker entry point
//!
//! Default mode runs the send workers and the maintenance sweeper until
//! interrupted. The `send`, `stop`, and `retry` subcommands perform
//! one-shot campaign operations against the same database.

use anyhow::{bail, Context, Result};
use postman_common::config::{Config, LoggingConfig, SmtpConfig};
use postman_common::types::ChannelType;
use postman_core::channels::{
    ChannelAdapter, EmailChannel, GovsgChannel, SmsChannel, TelegramChannel,
};
use postman_core::{HaltPolicy, Notifier, SendDispatcher, Sweeper, Worker, WorkerSettings};
use postman_storage::db::DatabasePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Postman send worker...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.health_check().await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return run_command(&args, &db_pool, &config).await;
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.worker.send_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let settings = WorkerSettings::from(&config.worker);
    let halt_policy = HaltPolicy::from(&config.halt);
    let credentials = Arc::new(postman_storage::repository::CredentialRepository::new(
        db_pool.pool().clone(),
    ));

    // Spawn worker slots per channel
    let mut handles = Vec::new();
    let pid = std::process::id();
    for &channel in &config.worker.channels {
        let adapter = build_adapter(channel, &http, &config.smtp);
        for slot in 0..config.worker.slots_per_channel {
            let worker = Worker::new(
                format!("worker-{}-{}-{}", pid, channel, slot),
                db_pool.pool().clone(),
                Arc::clone(&adapter),
                credentials.clone(),
                halt_policy,
                settings.clone(),
            );
            handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }
    }
    info!(
        channels = config.worker.channels.len(),
        slots_per_channel = config.worker.slots_per_channel,
        "Workers started"
    );

    // Start maintenance sweeper
    let sweeper = Sweeper::new(
        db_pool.pool().clone(),
        config.worker.channels.clone(),
        Notifier::new(config.smtp.clone()),
        &config.sweep,
    );
    handles.push(tokio::spawn(async move {
        sweeper.run().await;
    }));

    info!("Postman send worker started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for handle in handles {
        handle.abort();
    }

    info!("Postman send worker shutdown complete");
    Ok(())
}

/// One-shot campaign operations: `send <campaign-id> <rate>`,
/// `stop <campaign-id>`, `retry <campaign-id>`
async fn run_command(args: &[String], db_pool: &DatabasePool, config: &Config) -> Result<()> {
    let dispatcher = SendDispatcher::new(db_pool.pool().clone(), config.rates.clone());

    let campaign_id = |s: &str| {
        s.parse::<uuid::Uuid>()
            .with_context(|| format!("'{}' is not a campaign id", s))
    };

    match args {
        [cmd, id, rate] if cmd.as_str() == "send" => {
            let rate: u32 = rate
                .parse()
                .with_context(|| format!("'{}' is not a send rate", rate))?;
            let jobs = dispatcher.split_and_enqueue(campaign_id(id)?, rate).await?;
            info!(jobs = jobs.len(), "Campaign enqueued");
        }
        [cmd, id] if cmd.as_str() == "stop" => {
            let stopped = dispatcher.stop_campaign(campaign_id(id)?).await?;
            info!(stopped, "Campaign stopped");
        }
        [cmd, id] if cmd.as_str() == "retry" => {
            let requeued = dispatcher.retry_campaign(campaign_id(id)?).await?;
            info!(requeued, "Campaign retry enqueued");
        }
        _ => bail!("Usage: postman [send <campaign-id> <rate> | stop <campaign-id> | retry <campaign-id>]"),
    }

    Ok(())
}

fn build_adapter(
    channel: ChannelType,
    http: &reqwest::Client,
    smtp: &SmtpConfig,
) -> Arc<dyn ChannelAdapter> {
    match channel {
        ChannelType::Email => Arc::new(EmailChannel::new(smtp.clone())),
        ChannelType::Sms => Arc::new(SmsChannel::new(http.clone())),
        ChannelType::Telegram => Arc::new(TelegramChannel::new(http.clone())),
        ChannelType::Govsg => Arc::new(GovsgChannel::new(http.clone())),
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},postman=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
