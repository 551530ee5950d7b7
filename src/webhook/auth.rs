use async_trait::async_trait;
use std::sync::Arc;

use super::jwt::WebhookClaims;

/// Subject namespace for webhook tokens
pub const SUBJECT_PREFIX: &str = "webhook:";

/// Verifies a bearer token's signature and standard claims
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<WebhookClaims>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0:#}")]
    InvalidToken(anyhow::Error),
    #[error("subject {subject:?} is not a webhook subject")]
    WrongNamespace { subject: String },
    #[error("subject group {got:?} does not match {wanted:?}")]
    WrongGroup { got: String, wanted: String },
}

/// Extract the token from an `Authorization` header value
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthError> {
    authorization
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Check that `subject` is `webhook:<group>`
pub fn check_subject(subject: &str, group: &str) -> Result<(), AuthError> {
    let got = subject
        .strip_prefix(SUBJECT_PREFIX)
        .ok_or_else(|| AuthError::WrongNamespace {
            subject: subject.to_string(),
        })?;
    if got != group {
        return Err(AuthError::WrongGroup {
            got: got.to_string(),
            wanted: group.to_string(),
        });
    }
    Ok(())
}

/// Authenticates inbound webhook requests
pub struct WebhookAuthenticator {
    verifier: Arc<dyn TokenVerifier>,
    group: String,
}

impl WebhookAuthenticator {
    pub fn new(verifier: Arc<dyn TokenVerifier>, group: impl Into<String>) -> Self {
        Self {
            verifier,
            group: group.into(),
        }
    }

    /// Verify the `Authorization` header and return the token's claims
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<WebhookClaims, AuthError> {
        let token = bearer_token(authorization)?;
        let claims = self
            .verifier
            .verify(token)
            .await
            .map_err(AuthError::InvalidToken)?;
        check_subject(&claims.sub, &self.group)?;
        tracing::debug!(subject = %claims.sub, "Webhook token accepted");
        Ok(claims)
    }
}
