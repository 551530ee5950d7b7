use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_sdk_ecr::Client as EcrClient;

use super::{CreateRepositoryError, RepositoryApi, MANAGED_TAG_KEY};

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
pub fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    // Pattern: message: Some("actual error message")
    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    // JSON response body form
    if let Some(start) = debug_str.find("\"Message\":\"") {
        let start = start + 11; // length of '"Message":"'
        if let Some(end) = debug_str[start..].find('"') {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let mut cut = 200;
        while !debug_str.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &debug_str[..cut])
    } else {
        debug_str
    }
}

/// Creates ECR repositories in the destination account
pub struct EcrRepoManager {
    ecr_client: EcrClient,
}

impl EcrRepoManager {
    pub fn new(ecr_client: EcrClient) -> Self {
        Self { ecr_client }
    }
}

#[async_trait]
impl RepositoryApi for EcrRepoManager {
    /// Create the repository with scan-on-push enabled and tagged as managed
    async fn create_repository(&self, name: &str) -> Result<(), CreateRepositoryError> {
        let managed_tag = aws_sdk_ecr::types::Tag::builder()
            .key(MANAGED_TAG_KEY)
            .value(env!("CARGO_PKG_NAME"))
            .build()
            .context("Failed to build managed tag")?;

        let result = self
            .ecr_client
            .create_repository()
            .repository_name(name)
            .tags(managed_tag)
            .image_scanning_configuration(
                aws_sdk_ecr::types::ImageScanningConfiguration::builder()
                    .scan_on_push(true)
                    .build(),
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_repository_already_exists_exception() {
                        return Err(CreateRepositoryError::AlreadyExists);
                    }
                }
                Err(CreateRepositoryError::Failed(anyhow!(
                    "Failed to create ECR repository '{}': {}",
                    name,
                    format_sdk_error(&err)
                )))
            }
        }
    }
}
