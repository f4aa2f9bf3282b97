//! Credential store
//!
//! Credentials are provisioned outside this subsystem; the send core
//! resolves them read-only by name.

use async_trait::async_trait;
use postman_common::{Error, Result};
use sqlx::PgPool;

use crate::models::Credential;

/// Read-only resolution of named provider credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolve a credential by name
    async fn get(&self, name: &str) -> Result<Credential>;
}

/// Database-backed credential store
#[derive(Clone)]
pub struct CredentialRepository {
    pool: PgPool,
}

impl CredentialRepository {
    /// Create a new credential repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn get(&self, name: &str) -> Result<Credential> {
        let credential: Option<Credential> =
            sqlx::query_as("SELECT * FROM credentials WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        credential.ok_or_else(|| Error::CredentialNotFound(name.to_string()))
    }
}
