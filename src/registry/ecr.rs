use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_ecr::Client as EcrClient;
use base64::Engine;
use oci_distribution::secrets::RegistryAuth;

use super::CredentialsProvider;
use crate::federation::FederationError;

/// Native ECR credentials for the destination registry
///
/// Uses the ambient AWS credential chain to call `GetAuthorizationToken`.
pub struct EcrCredentials {
    client: EcrClient,
    registry_host: String,
}

impl EcrCredentials {
    pub fn new(client: EcrClient, registry_host: impl Into<String>) -> Self {
        Self {
            client,
            registry_host: registry_host.into(),
        }
    }

    async fn authorization_token(&self) -> anyhow::Result<(String, String)> {
        let response = self
            .client
            .get_authorization_token()
            .send()
            .await
            .context("Failed to get ECR authorization token")?;

        let auth_data = response
            .authorization_data()
            .first()
            .context("No authorization data returned from ECR")?;

        let token = auth_data
            .authorization_token()
            .context("No authorization token in response")?;

        decode_authorization_token(token)
    }
}

/// ECR tokens are base64("AWS:<password>")
fn decode_authorization_token(token: &str) -> anyhow::Result<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .context("Failed to decode ECR token")?;

    let decoded_str = String::from_utf8(decoded).context("ECR token is not valid UTF-8")?;

    let (username, password) = decoded_str
        .split_once(':')
        .context("Invalid ECR token format")?;

    Ok((username.to_string(), password.to_string()))
}

#[async_trait]
impl CredentialsProvider for EcrCredentials {
    fn name(&self) -> &'static str {
        "ecr"
    }

    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> Result<Option<RegistryAuth>, FederationError> {
        if registry_host != self.registry_host {
            return Ok(None);
        }

        let (username, password) =
            self.authorization_token()
                .await
                .map_err(|source| FederationError::NativeRegistry {
                    host: registry_host.to_string(),
                    source,
                })?;

        Ok(Some(RegistryAuth::Basic(username, password)))
    }
}
