//! Webhook-driven image replication.
//!
//! One invocation runs `authenticate → classify → provision → federate → copy`
//! start to finish. Irrelevant events stop after classification and succeed.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::ecr::{ensure_repository, Provisioned, RepositoryApi};
use crate::error::ReplicationError;
use crate::registry::reference::{registry_host, ReplicationTarget};
use crate::registry::{ImageCopier, Keychain};
use crate::webhook::{classify, Classification, SkipReason, WebhookAuthenticator};

/// Resolved settings an invocation runs with. Holds no secrets.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationConfig {
    pub issuer_url: String,
    pub group: String,
    pub identity: String,
    pub event_type: String,
    pub source_registry: String,
    pub destination_registry: String,
    pub repo_prefix: String,
}

/// The parts of an inbound webhook request the pipeline looks at
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub authorization: Option<String>,
    pub event_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    Copied {
        source: String,
        destination: String,
        manifest_url: String,
        provisioned: Provisioned,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Authenticated,
    Skipped,
    Classified,
    Provisioned,
    Federated,
    Copied,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Authenticated => "authenticated",
            Stage::Skipped => "skipped",
            Stage::Classified => "classified",
            Stage::Provisioned => "provisioned",
            Stage::Federated => "federated",
            Stage::Copied => "copied",
        };
        f.write_str(name)
    }
}

/// Runs the replication pipeline for inbound webhooks
pub struct Replicator {
    config: ReplicationConfig,
    authenticator: WebhookAuthenticator,
    repositories: Arc<dyn RepositoryApi>,
    keychain: Keychain,
    copier: Arc<dyn ImageCopier>,
}

impl Replicator {
    pub fn new(
        config: ReplicationConfig,
        authenticator: WebhookAuthenticator,
        repositories: Arc<dyn RepositoryApi>,
        keychain: Keychain,
        copier: Arc<dyn ImageCopier>,
    ) -> Self {
        Self {
            config,
            authenticator,
            repositories,
            keychain,
            copier,
        }
    }

    /// Handle one webhook invocation
    ///
    /// Failures are logged together with the notification body and the
    /// resolved configuration before being returned.
    pub async fn handle(&self, request: &InboundRequest) -> Result<Outcome, ReplicationError> {
        let result = self.run(request).await;
        if let Err(err) = &result {
            tracing::error!(
                error = %err,
                body = %String::from_utf8_lossy(&request.body),
                config = ?self.config,
                "Webhook invocation failed"
            );
        }
        result
    }

    async fn run(&self, request: &InboundRequest) -> Result<Outcome, ReplicationError> {
        let claims = self
            .authenticator
            .authenticate(request.authorization.as_deref())
            .await?;
        tracing::debug!(stage = %Stage::Authenticated, subject = %claims.sub);

        let (repository, tag, digest) = match classify(
            request.event_type.as_deref(),
            &request.body,
            &self.config.event_type,
        )? {
            Classification::Skip(reason) => {
                tracing::info!(stage = %Stage::Skipped, reason = %reason, "Ignoring event");
                return Ok(Outcome::Skipped(reason));
            }
            Classification::Actionable {
                repository,
                tag,
                digest,
            } => (repository, tag, digest),
        };
        if repository.trim_matches('/').is_empty() {
            return Err(ReplicationError::Decode(
                "notification has no repository".to_string(),
            ));
        }
        tracing::info!(
            stage = %Stage::Classified,
            repository = %repository,
            tag = %tag,
            digest = digest.as_deref().unwrap_or("unknown")
        );

        let target = ReplicationTarget::new(
            &self.config.source_registry,
            &self.config.destination_registry,
            &self.config.repo_prefix,
            &repository,
            &tag,
        );

        let provisioned = ensure_repository(self.repositories.as_ref(), &target.repository)
            .await
            .map_err(|source| ReplicationError::Provision {
                repository: target.repository.clone(),
                source,
            })?;
        tracing::info!(
            stage = %Stage::Provisioned,
            repository = %target.repository,
            result = %provisioned
        );

        let source_auth = self
            .keychain
            .resolve(registry_host(&self.config.source_registry))
            .await?;
        let destination_auth = self
            .keychain
            .resolve(registry_host(&self.config.destination_registry))
            .await?;
        tracing::debug!(stage = %Stage::Federated);

        let manifest_url = self
            .copier
            .copy(&target.source, &source_auth, &target.destination, &destination_auth)
            .await
            .map_err(|source| ReplicationError::Copy {
                from: target.source.clone(),
                to: target.destination.clone(),
                source,
            })?;
        tracing::info!(
            stage = %Stage::Copied,
            source = %target.source,
            destination = %target.destination,
            manifest = %manifest_url,
            "Replicated image"
        );

        Ok(Outcome::Copied {
            source: target.source,
            destination: target.destination,
            manifest_url,
            provisioned,
        })
    }
}
