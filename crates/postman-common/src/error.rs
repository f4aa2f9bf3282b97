//! Error types for Postman

use thiserror::Error;

/// Main error type for Postman
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Campaign {0} is not sendable")]
    CampaignNotSendable(uuid::Uuid),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Invalid send rate: {0}")]
    InvalidRate(u32),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Postman
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::CampaignNotSendable(_) => "CAMPAIGN_NOT_SENDABLE",
            Error::CredentialNotFound(_) => "CREDENTIAL_NOT_FOUND",
            Error::InvalidRate(_) => "INVALID_RATE",
            Error::Channel(_) => "CHANNEL_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e.to_string())
    }
}
