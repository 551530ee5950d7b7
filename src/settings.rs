use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

use crate::replication::ReplicationConfig;

/// Prefix of environment overrides, e.g. `MIRROR_WEBHOOK__ISSUER_URL`
const ENV_PREFIX: &str = "MIRROR";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub webhook: WebhookSettings,
    pub federation: FederationSettings,
    pub destination: DestinationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookSettings {
    /// OIDC issuer of webhook tokens; also the token exchange host
    pub issuer_url: String,
    /// Expected subject is `webhook:<group>`
    pub group: String,
    pub audience: String,
    /// CloudEvents type of push notifications
    pub event_type: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FederationSettings {
    /// Identity to exchange the AWS identity into
    pub identity: String,
    pub source_registry: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DestinationSettings {
    pub region: String,
    pub account_id: String,
    pub repo_prefix: String,
    /// Overrides the ECR registry host derived from account and region
    #[serde(default)]
    pub registry: Option<String>,
}

impl DestinationSettings {
    /// `<account>.dkr.ecr.<region>.amazonaws.com` unless overridden
    pub fn registry_host(&self) -> String {
        match &self.registry {
            Some(registry) if !registry.is_empty() => registry.clone(),
            _ => format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region),
        }
    }
}

impl Settings {
    /// Load settings from `$MIRROR_CONFIG_DIR` and the process environment
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("MIRROR_RUN_MODE").unwrap_or_else(|_| "production".into());
        let config_dir = env::var("MIRROR_CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load(&config_dir, &run_mode, None)
    }

    /// Layer `default`, `<run_mode>` and `local` files from `config_dir`
    /// (each optional, any format the `config` crate knows), then environment
    /// overrides. `env_vars` replaces the process environment when given.
    pub fn load(
        config_dir: &str,
        run_mode: &str,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("webhook.audience", "customer")?
            .set_default("webhook.event_type", "dev.chainguard.registry.push.v1")?
            .set_default("federation.source_registry", "cgr.dev")?;

        for name in ["default", run_mode, "local"] {
            let path = format!("{}/{}", config_dir, name);
            tracing::debug!("Looking for optional config file: {}.*", path);
            builder = builder.add_source(File::with_name(&path).required(false));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .source(env_vars),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("webhook.issuer_url", &self.webhook.issuer_url),
            ("webhook.group", &self.webhook.group),
            ("webhook.audience", &self.webhook.audience),
            ("webhook.event_type", &self.webhook.event_type),
            ("federation.identity", &self.federation.identity),
            ("federation.source_registry", &self.federation.source_registry),
            ("destination.region", &self.destination.region),
            ("destination.account_id", &self.destination.account_id),
            ("destination.repo_prefix", &self.destination.repo_prefix),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "{} must not be empty (set {}_{} or {} in a config file)",
                    key,
                    ENV_PREFIX,
                    key.to_uppercase().replace('.', "__"),
                    key
                )));
            }
        }

        url::Url::parse(&self.webhook.issuer_url).map_err(|e| {
            ConfigError::Message(format!(
                "webhook.issuer_url is not a valid URL ({}): {}",
                self.webhook.issuer_url, e
            ))
        })?;

        Ok(())
    }

    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig {
            issuer_url: self.webhook.issuer_url.clone(),
            group: self.webhook.group.clone(),
            identity: self.federation.identity.clone(),
            event_type: self.webhook.event_type.clone(),
            source_registry: self.federation.source_registry.clone(),
            destination_registry: self.destination.registry_host(),
            repo_prefix: self.destination.repo_prefix.clone(),
        }
    }
}
