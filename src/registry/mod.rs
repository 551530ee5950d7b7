pub mod copy;
pub mod ecr;
pub mod keychain;
pub mod reference;

pub use copy::{ImageCopier, OciImageCopier};
pub use ecr::EcrCredentials;
pub use keychain::{AnonymousCredentials, Keychain};

use async_trait::async_trait;
use oci_distribution::secrets::RegistryAuth;

use crate::federation::FederationError;

/// Resolves registry credentials for a registry host
///
/// Implementations answer `Ok(None)` for hosts they are not responsible for,
/// so that the next provider in a [`Keychain`] gets a chance.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Get credentials for a specific registry host (e.g. "cgr.dev")
    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> Result<Option<RegistryAuth>, FederationError>;
}
