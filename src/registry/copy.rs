use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    OciDescriptor, IMAGE_LAYER_NONDISTRIBUTABLE_GZIP_MEDIA_TYPE,
    IMAGE_LAYER_NONDISTRIBUTABLE_MEDIA_TYPE, IMAGE_MANIFEST_LIST_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use reqwest::header::HeaderValue;
use serde::Deserialize;

/// Docker's media type for foreign (non-distributable) layers
const DOCKER_FOREIGN_LAYER_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    OCI_IMAGE_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE,
];

/// Copies an image between registries
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// Copy `source` to `destination`, returning the pushed manifest URL
    async fn copy(
        &self,
        source: &str,
        source_auth: &RegistryAuth,
        destination: &str,
        destination_auth: &RegistryAuth,
    ) -> Result<String>;
}

/// Image copy over the OCI distribution API
///
/// Manifests are forwarded byte for byte with their original media type, so
/// the destination digest equals the source digest. Indexes are copied with
/// every child manifest. Blobs move one at a time. A new client (and token
/// cache) is used for every copy.
#[derive(Debug, Clone, Default)]
pub struct OciImageCopier {
    protocol: ClientProtocol,
}

impl OciImageCopier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific protocol, e.g. plain HTTP for a local registry
    pub fn with_protocol(protocol: ClientProtocol) -> Self {
        Self { protocol }
    }

    fn client(&self) -> Client {
        Client::new(ClientConfig {
            protocol: self.protocol.clone(),
            ..Default::default()
        })
    }
}

fn parse_reference(image: &str) -> Result<Reference> {
    Reference::try_from(image).with_context(|| format!("Invalid image reference: {}", image))
}

/// The fields of a manifest or index needed to walk its content
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestContent {
    media_type: Option<String>,
    config: Option<OciDescriptor>,
    #[serde(default)]
    layers: Vec<OciDescriptor>,
    #[serde(default)]
    manifests: Vec<OciDescriptor>,
}

impl ManifestContent {
    fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).context("Failed to parse manifest")
    }

    /// Media type to push the raw bytes with
    fn media_type(&self) -> &str {
        match &self.media_type {
            Some(media_type) => media_type,
            None if !self.manifests.is_empty() => OCI_IMAGE_INDEX_MEDIA_TYPE,
            None => OCI_IMAGE_MEDIA_TYPE,
        }
    }

    fn is_index(&self) -> bool {
        matches!(
            self.media_type(),
            OCI_IMAGE_INDEX_MEDIA_TYPE | IMAGE_MANIFEST_LIST_MEDIA_TYPE
        )
    }

    /// Config and layer blobs that must exist at the destination
    fn blobs(&self) -> impl Iterator<Item = &OciDescriptor> {
        self.config
            .iter()
            .chain(self.layers.iter().filter(|layer| is_distributable(layer)))
    }
}

fn is_distributable(descriptor: &OciDescriptor) -> bool {
    !matches!(
        descriptor.media_type.as_str(),
        IMAGE_LAYER_NONDISTRIBUTABLE_MEDIA_TYPE
            | IMAGE_LAYER_NONDISTRIBUTABLE_GZIP_MEDIA_TYPE
            | DOCKER_FOREIGN_LAYER_MEDIA_TYPE
    )
}

fn content_type(media_type: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(media_type)
        .with_context(|| format!("Invalid manifest media type: {}", media_type))
}

async fn copy_blobs(
    client: &Client,
    source: &Reference,
    destination: &Reference,
    content: &ManifestContent,
) -> Result<()> {
    for blob in content.blobs() {
        let mut data = Vec::new();
        client
            .pull_blob(source, blob, &mut data)
            .await
            .with_context(|| format!("Failed to pull blob {} from {}", blob.digest, source))?;
        client
            .push_blob(destination, &data, &blob.digest)
            .await
            .with_context(|| format!("Failed to push blob {} to {}", blob.digest, destination))?;
        tracing::debug!(digest = %blob.digest, bytes = data.len(), "Copied blob");
    }
    Ok(())
}

/// Copy the blobs of one image manifest, then the manifest itself
async fn copy_image_manifest(
    client: &Client,
    source: &Reference,
    destination: &Reference,
    raw: Vec<u8>,
    content: &ManifestContent,
) -> Result<String> {
    copy_blobs(client, source, destination, content).await?;
    client
        .push_manifest_raw(destination, raw, content_type(content.media_type())?)
        .await
        .with_context(|| format!("Failed to push manifest to {}", destination))
}

#[async_trait]
impl ImageCopier for OciImageCopier {
    async fn copy(
        &self,
        source: &str,
        source_auth: &RegistryAuth,
        destination: &str,
        destination_auth: &RegistryAuth,
    ) -> Result<String> {
        let source_ref = parse_reference(source)?;
        let destination_ref = parse_reference(destination)?;

        let client = self.client();
        client
            .auth(&source_ref, source_auth, RegistryOperation::Pull)
            .await
            .with_context(|| format!("Failed to authenticate to {}", source_ref.registry()))?;
        client
            .auth(&destination_ref, destination_auth, RegistryOperation::Push)
            .await
            .with_context(|| format!("Failed to authenticate to {}", destination_ref.registry()))?;

        let (raw, digest) = client
            .pull_manifest_raw(&source_ref, source_auth, ACCEPTED_MANIFEST_TYPES)
            .await
            .with_context(|| format!("Failed to pull manifest for {}", source))?;
        let content = ManifestContent::parse(&raw)?;

        tracing::debug!(
            source = %source,
            digest = %digest,
            media_type = %content.media_type(),
            "Pulled manifest"
        );

        if !content.is_index() {
            return copy_image_manifest(&client, &source_ref, &destination_ref, raw, &content)
                .await;
        }

        for child in &content.manifests {
            let child_source = Reference::with_digest(
                source_ref.registry().to_string(),
                source_ref.repository().to_string(),
                child.digest.clone(),
            );
            let child_destination = Reference::with_digest(
                destination_ref.registry().to_string(),
                destination_ref.repository().to_string(),
                child.digest.clone(),
            );

            let (child_raw, _) = client
                .pull_manifest_raw(&child_source, source_auth, ACCEPTED_MANIFEST_TYPES)
                .await
                .with_context(|| format!("Failed to pull manifest {}", child_source))?;
            let child_content = ManifestContent::parse(&child_raw)?;
            if child_content.is_index() {
                bail!("Nested image index {} is not supported", child.digest);
            }

            copy_image_manifest(
                &client,
                &child_source,
                &child_destination,
                child_raw,
                &child_content,
            )
            .await?;
            tracing::debug!(digest = %child.digest, "Copied child manifest");
        }

        client
            .push_manifest_raw(&destination_ref, raw, content_type(content.media_type())?)
            .await
            .with_context(|| format!("Failed to push index to {}", destination))
    }
}
