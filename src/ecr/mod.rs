mod manager;

pub use manager::{format_sdk_error, EcrRepoManager};

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Tag key set on repositories this service creates
pub const MANAGED_TAG_KEY: &str = "managed-by";

/// Failure modes of a repository create call
#[derive(Debug, thiserror::Error)]
pub enum CreateRepositoryError {
    #[error("repository already exists")]
    AlreadyExists,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Registry-side repository operations
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    async fn create_repository(&self, name: &str) -> Result<(), CreateRepositoryError>;
}

/// What `ensure_repository` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

impl fmt::Display for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provisioned::Created => write!(f, "created"),
            Provisioned::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// Make sure a repository exists. Safe to call on every event.
pub async fn ensure_repository(api: &dyn RepositoryApi, name: &str) -> Result<Provisioned> {
    match api.create_repository(name).await {
        Ok(()) => {
            tracing::info!(repository = %name, "Created repository");
            Ok(Provisioned::Created)
        }
        Err(CreateRepositoryError::AlreadyExists) => {
            tracing::info!(repository = %name, "Repository already exists");
            Ok(Provisioned::AlreadyExists)
        }
        Err(CreateRepositoryError::Failed(e)) => Err(e),
    }
}
