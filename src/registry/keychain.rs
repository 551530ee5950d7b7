use async_trait::async_trait;
use oci_distribution::secrets::RegistryAuth;
use std::sync::Arc;

use super::CredentialsProvider;
use crate::federation::FederationError;

/// Answers every host with anonymous access. Put it last in a chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousCredentials;

#[async_trait]
impl CredentialsProvider for AnonymousCredentials {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    async fn get_credentials(
        &self,
        _registry_host: &str,
    ) -> Result<Option<RegistryAuth>, FederationError> {
        Ok(Some(RegistryAuth::Anonymous))
    }
}

/// Ordered chain of credential providers.
///
/// The first provider that answers for a host wins. A provider error stops
/// the chain. If nobody answers, resolution fails rather than silently
/// falling back to anonymous access.
#[derive(Clone, Default)]
pub struct Keychain {
    providers: Vec<Arc<dyn CredentialsProvider>>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to the end of the chain
    pub fn with(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Names of the providers in resolution order
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn resolve(&self, registry_host: &str) -> Result<RegistryAuth, FederationError> {
        for provider in &self.providers {
            if let Some(auth) = provider.get_credentials(registry_host).await? {
                tracing::debug!(
                    registry = %registry_host,
                    provider = provider.name(),
                    "Resolved registry credentials"
                );
                return Ok(auth);
            }
        }

        Err(FederationError::Unresolved(registry_host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticCredentials;

    #[tokio::test]
    async fn test_first_matching_provider_wins() {
        let keychain = Keychain::new()
            .with(Arc::new(StaticCredentials::new("registry.a", "user-a", "pass-a")))
            .with(Arc::new(StaticCredentials::new("registry.b", "user-b", "pass-b")))
            .with(Arc::new(AnonymousCredentials));

        let auth = keychain.resolve("registry.b").await.unwrap();
        assert!(matches!(auth, RegistryAuth::Basic(ref u, _) if u == "user-b"));

        let auth = keychain.resolve("registry.a").await.unwrap();
        assert!(matches!(auth, RegistryAuth::Basic(ref u, _) if u == "user-a"));
    }

    #[tokio::test]
    async fn test_anonymous_terminates_chain() {
        let keychain = Keychain::new()
            .with(Arc::new(StaticCredentials::new("registry.a", "user", "pass")))
            .with(Arc::new(AnonymousCredentials));

        let auth = keychain.resolve("elsewhere.example").await.unwrap();
        assert!(matches!(auth, RegistryAuth::Anonymous));
    }

    #[tokio::test]
    async fn test_unresolved_without_fallback() {
        let keychain =
            Keychain::new().with(Arc::new(StaticCredentials::new("registry.a", "user", "pass")));

        let result = keychain.resolve("elsewhere.example").await;
        assert!(matches!(result, Err(FederationError::Unresolved(ref h)) if h == "elsewhere.example"));
    }

    #[tokio::test]
    async fn test_provider_error_stops_chain() {
        let keychain = Keychain::new()
            .with(Arc::new(StaticCredentials::failing("registry.a")))
            .with(Arc::new(AnonymousCredentials));

        assert!(keychain.resolve("registry.a").await.is_err());
    }

    #[test]
    fn test_provider_names_in_order() {
        let keychain = Keychain::new()
            .with(Arc::new(StaticCredentials::new("registry.a", "user", "pass")))
            .with(Arc::new(AnonymousCredentials));
        assert_eq!(keychain.provider_names(), vec!["static", "anonymous"]);
    }
}
