use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use oci_distribution::secrets::RegistryAuth;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use super::assertion::AssertionBuilder;
use super::error::FederationError;
use crate::clock::Clock;
use crate::registry::CredentialsProvider;

/// Username the source registry expects alongside an exchanged token
pub const TOKEN_USERNAME: &str = "_token";

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    token: String,
}

/// Federated credentials for the source registry.
///
/// Proves the local AWS identity to the issuer's token exchange with a signed
/// `GetCallerIdentity` assertion and gets back a short-lived registry token.
/// Only answers for the configured source registry host.
pub struct FederatedCredentials {
    http_client: reqwest::Client,
    aws_credentials: SharedCredentialsProvider,
    assertions: AssertionBuilder,
    issuer_url: String,
    identity: String,
    registry_host: String,
}

impl FederatedCredentials {
    pub fn new(
        http_client: reqwest::Client,
        aws_credentials: SharedCredentialsProvider,
        clock: Arc<dyn Clock>,
        issuer_url: impl Into<String>,
        identity: impl Into<String>,
        registry_host: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            aws_credentials,
            assertions: AssertionBuilder::new(clock),
            issuer_url: issuer_url.into(),
            identity: identity.into(),
            registry_host: registry_host.into(),
        }
    }

    /// `<issuer>/sts/exchange?aud=<registry>&identity=<identity>`
    fn exchange_url(&self, audience: &str) -> Result<Url, FederationError> {
        let mut url = Url::parse(&self.issuer_url)
            .and_then(|issuer| issuer.join("/sts/exchange"))
            .map_err(|e| FederationError::Endpoint(format!("{}: {}", self.issuer_url, e)))?;
        url.query_pairs_mut()
            .append_pair("aud", audience)
            .append_pair("identity", &self.identity);
        Ok(url)
    }

    /// Exchange a fresh assertion for a registry token scoped to `registry_host`
    pub async fn exchange(&self, registry_host: &str) -> Result<String, FederationError> {
        let credentials = self
            .aws_credentials
            .provide_credentials()
            .await
            .map_err(|e| FederationError::Credentials(e.to_string()))?;

        let assertion = self
            .assertions
            .build(&credentials, &self.issuer_url, &self.identity)?;
        let url = self.exchange_url(registry_host)?;

        tracing::debug!(
            url = %url,
            identity = %self.identity,
            "Exchanging signed AWS identity assertion for registry token"
        );

        let response = self
            .http_client
            .post(url)
            .bearer_auth(assertion.as_str())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(FederationError::Exchange {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ExchangeResponse =
            serde_json::from_str(&body).map_err(|e| FederationError::Decode(e.to_string()))?;

        tracing::info!(registry = %registry_host, "Obtained federated registry token");
        Ok(parsed.token)
    }
}

#[async_trait]
impl CredentialsProvider for FederatedCredentials {
    fn name(&self) -> &'static str {
        "federated"
    }

    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> Result<Option<RegistryAuth>, FederationError> {
        if registry_host != self.registry_host {
            return Ok(None);
        }

        let token = self.exchange(registry_host).await?;
        Ok(Some(RegistryAuth::Basic(TOKEN_USERNAME.to_string(), token)))
    }
}
