use crate::digest::Digest;
use crate::error::LayoutError;
use berth_remote::{Descriptor, MEDIA_TYPE_OCI_INDEX, ManifestDescriptor, ManifestList, ManifestV2};
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const BLOBS_DIR: &str = "blobs";
const INGEST_DIR: &str = "ingest";
const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutMarker {
    image_layout_version: String,
}

/// A local OCI image layout directory holding a single image.
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    pub async fn create(root: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join(BLOBS_DIR).join("sha256")).await?;
        fs::create_dir_all(root.join(INGEST_DIR)).await?;

        let marker = LayoutMarker {
            image_layout_version: LAYOUT_VERSION.to_string(),
        };
        fs::write(root.join(OCI_LAYOUT_FILE), serde_json::to_vec(&marker)?).await?;

        Ok(Self { root })
    }

    pub async fn open(root: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let root = root.as_ref().to_path_buf();
        let marker_path = root.join(OCI_LAYOUT_FILE);

        let content = match fs::read(&marker_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LayoutError::NotALayout(root.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let marker: LayoutMarker = serde_json::from_slice(&content)?;
        tracing::debug!(
            "Opened OCI layout {:?} (version {})",
            root,
            marker.image_layout_version
        );

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(BLOBS_DIR)
            .join(&digest.algorithm)
            .join(&digest.hash)
    }

    pub async fn has_blob(&self, digest: &Digest) -> bool {
        fs::metadata(self.blob_path(digest)).await.is_ok()
    }

    pub async fn put_blob(
        &self,
        data: &[u8],
        expected_digest: Option<&Digest>,
    ) -> Result<Digest, LayoutError> {
        let digest = Digest::of(data);

        if let Some(expected) = expected_digest
            && *expected != digest
        {
            return Err(LayoutError::DigestMismatch {
                expected: expected.to_string(),
                actual: digest.to_string(),
            });
        }

        let blob_path = self.blob_path(&digest);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&blob_path, data).await?;

        Ok(digest)
    }

    /// Opens a streaming writer that lands at the blob path only if the
    /// written bytes hash to `expected`.
    pub async fn blob_writer(&self, expected: Digest) -> Result<BlobWriter, LayoutError> {
        let ingest_path = self.root.join(INGEST_DIR).join(expected.encoded());
        let final_path = self.blob_path(&expected);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::File::create(&ingest_path).await?;

        Ok(BlobWriter {
            file,
            hasher: Sha256::new(),
            ingest_path,
            final_path,
            expected,
            written: 0,
        })
    }

    /// Records `manifest` as the only image in `index.json`.
    pub async fn set_manifest(&self, manifest: ManifestDescriptor) -> Result<(), LayoutError> {
        let index = ManifestList {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_INDEX.to_string()),
            manifests: vec![manifest],
        };
        fs::write(self.root.join(INDEX_FILE), serde_json::to_vec_pretty(&index)?).await?;
        Ok(())
    }

    pub async fn index(&self) -> Result<ManifestList, LayoutError> {
        let path = self.root.join(INDEX_FILE);
        let content = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LayoutError::ManifestNotFound(self.root.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    /// Reads the single manifest referenced by `index.json`.
    pub async fn manifest(&self) -> Result<(Digest, ManifestV2), LayoutError> {
        let index = self.index().await?;
        let [descriptor] = index.manifests.as_slice() else {
            return Err(LayoutError::ManifestCount {
                path: self.root.display().to_string(),
                count: index.manifests.len(),
            });
        };

        let digest = Digest::parse(&descriptor.digest)?;
        let path = self.blob_path(&digest);
        let content = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LayoutError::BlobNotFound(digest.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok((digest, serde_json::from_slice(&content)?))
    }

    /// Resolves the layer blob of a single-layer image.
    pub async fn single_layer(&self) -> Result<(Descriptor, PathBuf), LayoutError> {
        let (manifest_digest, manifest) = self.manifest().await?;
        let [layer] = manifest.layers.as_slice() else {
            return Err(LayoutError::LayerCount {
                digest: manifest_digest.to_string(),
                count: manifest.layers.len(),
            });
        };

        let layer_digest = Digest::parse(&layer.digest)?;
        let path = self.blob_path(&layer_digest);
        if !self.has_blob(&layer_digest).await {
            return Err(LayoutError::BlobNotFound(layer_digest.to_string()));
        }

        Ok((layer.clone(), path))
    }
}

/// Streams a blob into the layout's ingest area, verifying its digest on commit.
pub struct BlobWriter {
    file: fs::File,
    hasher: Sha256,
    ingest_path: PathBuf,
    final_path: PathBuf,
    expected: Digest,
    written: u64,
}

impl BlobWriter {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), LayoutError> {
        self.hasher.update(chunk);
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn commit(mut self) -> Result<(Digest, u64), LayoutError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        let actual = Digest::from_hasher(self.hasher);
        if actual != self.expected {
            if let Err(e) = fs::remove_file(&self.ingest_path).await {
                tracing::warn!("Failed to remove rejected blob {:?}: {}", self.ingest_path, e);
            }
            return Err(LayoutError::DigestMismatch {
                expected: self.expected.to_string(),
                actual: actual.to_string(),
            });
        }

        fs::rename(&self.ingest_path, &self.final_path).await?;
        Ok((actual, self.written))
    }
}
