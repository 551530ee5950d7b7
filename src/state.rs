use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::ecr::EcrRepoManager;
use crate::federation::FederatedCredentials;
use crate::registry::reference::registry_host;
use crate::registry::{AnonymousCredentials, EcrCredentials, Keychain, OciImageCopier};
use crate::replication::Replicator;
use crate::settings::Settings;
use crate::webhook::{JwtValidator, WebhookAuthenticator};

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub replicator: Arc<Replicator>,
}

impl AppState {
    pub fn new(replicator: Replicator) -> Self {
        Self {
            replicator: Arc::new(replicator),
        }
    }

    /// Wire up the AWS clients, the credential chain and the replicator
    pub async fn new_for_server(settings: &Settings) -> Result<Self> {
        let config = settings.replication_config();

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.destination.region.clone()))
            .load()
            .await;
        let ecr_client = aws_sdk_ecr::Client::new(&sdk_config);
        let aws_credentials = sdk_config
            .credentials_provider()
            .context("No AWS credentials provider available")?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let validator = JwtValidator::new(
            http_client.clone(),
            &settings.webhook.issuer_url,
            &settings.webhook.audience,
            clock.clone(),
        );
        let authenticator = WebhookAuthenticator::new(Arc::new(validator), &config.group);

        let keychain = Keychain::new()
            .with(Arc::new(EcrCredentials::new(
                ecr_client.clone(),
                registry_host(&config.destination_registry),
            )))
            .with(Arc::new(FederatedCredentials::new(
                http_client,
                aws_credentials,
                clock,
                &config.issuer_url,
                &config.identity,
                registry_host(&config.source_registry),
            )))
            .with(Arc::new(AnonymousCredentials));

        tracing::info!(
            providers = ?keychain.provider_names(),
            source = %config.source_registry,
            destination = %config.destination_registry,
            prefix = %config.repo_prefix,
            "Replication pipeline configured"
        );

        Ok(Self::new(Replicator::new(
            config,
            authenticator,
            Arc::new(EcrRepoManager::new(ecr_client)),
            keychain,
            Arc::new(OciImageCopier::new()),
        )))
    }
}
