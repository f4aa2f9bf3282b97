//! Postman core - campaign send pipeline
//!
//! Splits campaigns into rate-capped jobs, dispatches them through
//! channel adapters, and maintains the job queue with periodic sweeps.

pub mod channels;
pub mod dispatcher;
pub mod halt;
pub mod splitter;
pub mod stats;
pub mod sweep;
pub mod worker;

pub use channels::{ChannelAdapter, SendError};
pub use dispatcher::SendDispatcher;
pub use halt::{should_halt, HaltPolicy};
pub use splitter::{plan_jobs, SplitError};
pub use stats::{CampaignSummary, Notifier};
pub use sweep::Sweeper;
pub use worker::{Worker, WorkerSettings};
