//! Configuration for Postman
//!
//! The configuration is constructed once at process start and passed down
//! explicitly; nothing in the dispatch loop reaches for ambient globals.

use crate::types::ChannelType;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Worker dispatch loop configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Send rate limits
    #[serde(default)]
    pub rates: RateConfig,

    /// Halt circuit breaker thresholds
    #[serde(default)]
    pub halt: HaltConfig,

    /// Maintenance sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,

    /// SMTP relay for the email channel and owner notifications
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (PostgreSQL)
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Worker dispatch loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker slots spawned per channel
    #[serde(default = "default_slots_per_channel")]
    pub slots_per_channel: usize,

    /// Channels this process serves
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelType>,

    /// Seconds between claim polls when no job is held
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum concurrent sends within one batch
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Hard timeout per provider send call, in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Attempts for outcome writes before the job claim is released
    #[serde(default = "default_db_write_attempts")]
    pub db_write_attempts: u32,

    /// Base delay for outcome-write backoff, in milliseconds
    #[serde(default = "default_db_backoff_base_ms")]
    pub db_backoff_base_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            slots_per_channel: default_slots_per_channel(),
            channels: default_channels(),
            poll_interval_secs: default_poll_interval(),
            batch_concurrency: default_batch_concurrency(),
            send_timeout_secs: default_send_timeout(),
            db_write_attempts: default_db_write_attempts(),
            db_backoff_base_ms: default_db_backoff_base_ms(),
        }
    }
}

fn default_slots_per_channel() -> usize {
    2
}

fn default_channels() -> Vec<ChannelType> {
    ChannelType::all().to_vec()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_batch_concurrency() -> usize {
    10
}

fn default_send_timeout() -> u64 {
    30
}

fn default_db_write_attempts() -> u32 {
    5
}

fn default_db_backoff_base_ms() -> u64 {
    200
}

/// Send rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    /// Maximum messages per second a single job may be allotted
    #[serde(default = "default_max_rate_per_job")]
    pub max_rate_per_job: u32,

    /// Fixed rate for email jobs; the email channel is shared across
    /// campaigns, so requested rates are ignored for it
    #[serde(default = "default_email_rate")]
    pub default_email_rate: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            max_rate_per_job: default_max_rate_per_job(),
            default_email_rate: default_email_rate(),
        }
    }
}

fn default_max_rate_per_job() -> u32 {
    150
}

fn default_email_rate() -> u32 {
    35
}

/// Halt circuit breaker thresholds
///
/// A campaign halts when the errored count exceeds both the absolute
/// threshold and the percentage of sent messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltConfig {
    /// Minimum absolute errored count before a halt is considered
    #[serde(default = "default_min_halt_number")]
    pub min_halt_number: i64,

    /// Minimum errored/sent ratio before a halt is considered
    #[serde(default = "default_min_halt_percentage")]
    pub min_halt_percentage: f64,
}

impl Default for HaltConfig {
    fn default() -> Self {
        Self {
            min_halt_number: default_min_halt_number(),
            min_halt_percentage: default_min_halt_percentage(),
        }
    }
}

fn default_min_halt_number() -> i64 {
    10
}

fn default_min_halt_percentage() -> f64 {
    0.1
}

/// Maintenance sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweep passes (log close-out + stall reclaim)
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// A claimed job with no message progress within this window is
    /// reset to Ready and becomes claimable again
    #[serde(default = "default_stall_window")]
    pub stall_window_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            stall_window_secs: default_stall_window(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_stall_window() -> u64 {
    600
}

/// SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Relay username
    pub username: Option<String>,

    /// Relay password
    pub password: Option<String>,

    /// Use STARTTLS
    #[serde(default = "default_use_starttls")]
    pub use_starttls: bool,

    /// From address for owner notifications
    #[serde(default = "default_notify_from")]
    pub notify_from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            use_starttls: default_use_starttls(),
            notify_from: default_notify_from(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_starttls() -> bool {
    true
}

fn default_notify_from() -> String {
    "donotreply@postman.local".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./postman.toml"),
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/postman/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.slots_per_channel, 2);
        assert_eq!(worker.batch_concurrency, 10);
        assert_eq!(worker.channels.len(), 4);

        let rates = RateConfig::default();
        assert_eq!(rates.max_rate_per_job, 150);
        assert_eq!(rates.default_email_rate, 35);

        let halt = HaltConfig::default();
        assert_eq!(halt.min_halt_number, 10);
        assert!((halt.min_halt_percentage - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
url = "postgres://localhost/postman"

[worker]
slots_per_channel = 4
channels = ["sms", "telegram"]

[rates]
max_rate_per_job = 100

[sweep]
stall_window_secs = 120
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/postman");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.worker.slots_per_channel, 4);
        assert_eq!(
            config.worker.channels,
            vec![ChannelType::Sms, ChannelType::Telegram]
        );
        assert_eq!(config.rates.max_rate_per_job, 100);
        assert_eq!(config.rates.default_email_rate, 35);
        assert_eq!(config.sweep.stall_window_secs, 120);
        assert_eq!(config.smtp.port, 587);
    }
}
