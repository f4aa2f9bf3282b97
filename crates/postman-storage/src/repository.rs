//! Repository layer for data access

pub mod campaigns;
pub mod credentials;
pub mod jobs;
pub mod messages;
pub mod statistics;

pub use campaigns::CampaignRepository;
pub use credentials::{CredentialRepository, CredentialStore};
pub use jobs::JobRepository;
pub use messages::MessageRepository;
pub use statistics::StatisticRepository;
