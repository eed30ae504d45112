use crate::error::DiskError;
use async_trait::async_trait;
use berth_remote::{
    Descriptor, ImageReference, Manifest, ManifestDescriptor, RawManifest, RegistryClient,
};
use berth_store::{Digest, OciLayout};
use std::collections::HashMap;
use std::path::Path;

/// Where disk artifacts come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetches the manifest or manifest list at `reference`.
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest, DiskError>;

    /// Copies the digest-pinned image at `reference` into a fresh OCI
    /// layout at `dest`.
    async fn pull(&self, reference: &ImageReference, dest: &Path) -> Result<(), DiskError>;
}

/// Pulls artifacts straight from a registry over HTTP.
pub struct RegistrySource {
    client: RegistryClient,
}

impl RegistrySource {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    async fn pull_blob(
        &self,
        reference: &ImageReference,
        layout: &OciLayout,
        descriptor: &Descriptor,
    ) -> Result<(), DiskError> {
        let digest = Digest::parse(&descriptor.digest)?;
        if layout.has_blob(&digest).await {
            return Ok(());
        }

        let mut response = self.client.get_blob(reference, &descriptor.digest).await?;
        let mut writer = layout.blob_writer(digest).await?;
        while let Some(chunk) = response.chunk().await? {
            writer.write(&chunk).await?;
        }
        let (digest, size) = writer.commit().await?;

        tracing::debug!(digest = %digest, size, "Pulled blob");
        Ok(())
    }
}

#[async_trait]
impl ArtifactSource for RegistrySource {
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest, DiskError> {
        Ok(self.client.get_manifest(reference).await?)
    }

    async fn pull(&self, reference: &ImageReference, dest: &Path) -> Result<(), DiskError> {
        tracing::info!("Pulling {}", reference);

        let raw = self.client.get_manifest(reference).await?;
        let Manifest::V2(manifest) = &raw.manifest else {
            return Err(DiskError::NotFound(format!(
                "{} is a manifest list, not an image",
                reference
            )));
        };

        let layout = OciLayout::create(dest).await?;
        let manifest_digest = layout
            .put_blob(&raw.bytes, Some(&Digest::parse(&raw.digest)?))
            .await?;

        self.pull_blob(reference, &layout, &manifest.config).await?;
        for layer in &manifest.layers {
            self.pull_blob(reference, &layout, layer).await?;
        }

        layout
            .set_manifest(ManifestDescriptor {
                media_type: raw.content_type.clone(),
                digest: manifest_digest.to_string(),
                size: raw.bytes.len() as i64,
                platform: None,
                annotations: HashMap::new(),
            })
            .await?;

        Ok(())
    }
}
