use crate::disker::Disker;
use crate::error::DiskError;
use crate::source::ArtifactSource;
use async_trait::async_trait;
use berth_machine::VmType;
use berth_remote::{
    ANNOTATION_DISK_TYPE, ANNOTATION_TITLE, ImageReference, Manifest, ManifestDescriptor,
};
use berth_store::{Digest, OciLayout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const MACHINE_OS_REPOSITORY: &str = "quay.io/podman";

/// Published machine OS stream the default image tracks.
pub const MACHINE_OS_VERSION: &str = "5.5";
const GUEST_OS: &str = "linux";
const SCRATCH_PREFIX: &str = ".pull-";

/// `docker://quay.io/podman/machine-os:<MACHINE_OS_VERSION>`.
pub fn default_image_reference(vm_type: VmType) -> String {
    let image = match vm_type {
        VmType::Wsl => "machine-os-wsl",
        _ => "machine-os",
    };
    format!(
        "docker://{}/{}:{}",
        MACHINE_OS_REPOSITORY, image, MACHINE_OS_VERSION
    )
}

/// Host CPU architecture as named in disk artifact platforms.
pub fn host_arch() -> Result<&'static str, DiskError> {
    normalize_arch(std::env::consts::ARCH)
}

fn normalize_arch(arch: &str) -> Result<&'static str, DiskError> {
    match arch {
        "x86_64" | "amd64" => Ok("x86_64"),
        "aarch64" | "arm64" => Ok("aarch64"),
        other => Err(DiskError::UnsupportedArch(other.to_string())),
    }
}

/// Last two extensions of an artifact title, e.g. `.qcow2.xz`.
pub fn extract_kind_and_compression(title: &str) -> String {
    let path = Path::new(title);
    let compression = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let kind = path
        .file_stem()
        .map(Path::new)
        .and_then(Path::extension)
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}{}", kind, compression)
}

/// The architecture / OS / disk type triple a manifest list entry must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskArtifactKey {
    pub arch: String,
    pub os: String,
    pub disk_type: String,
}

impl DiskArtifactKey {
    pub fn for_host(vm_type: VmType) -> Result<Self, DiskError> {
        Ok(Self {
            arch: host_arch()?.to_string(),
            os: GUEST_OS.to_string(),
            disk_type: vm_type.disk_type().to_string(),
        })
    }

    fn matches(&self, descriptor: &ManifestDescriptor) -> bool {
        descriptor.annotation(ANNOTATION_DISK_TYPE) == Some(self.disk_type.as_str())
            && descriptor
                .platform
                .as_ref()
                .is_some_and(|p| p.architecture == self.arch && p.os == self.os)
    }
}

/// A resolved disk artifact: which image to pull and where it is cached.
#[derive(Debug, Clone)]
struct ResolvedArtifact {
    reference: ImageReference,
    layer_digest: Digest,
    cache_path: PathBuf,
}

/// Disk image shipped as a single-layer OCI artifact in a manifest list.
///
/// Pulled layers are cached under their digest, so an unchanged remote
/// artifact is only downloaded once.
pub struct OciArtifactDisk {
    source: Arc<dyn ArtifactSource>,
    reference: ImageReference,
    is_default: bool,
    key: DiskArtifactKey,
    cache_dir: PathBuf,
    final_path: PathBuf,
}

impl OciArtifactDisk {
    /// An empty `endpoint` selects the default image for `vm_type`.
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        endpoint: &str,
        key: DiskArtifactKey,
        vm_type: VmType,
        cache_dir: &Path,
        final_path: &Path,
    ) -> Result<Self, DiskError> {
        let is_default = endpoint.is_empty();
        let endpoint = if is_default {
            default_image_reference(vm_type)
        } else {
            endpoint.to_string()
        };

        Ok(Self {
            source,
            reference: ImageReference::parse(&endpoint)?,
            is_default,
            key,
            cache_dir: cache_dir.to_path_buf(),
            final_path: final_path.to_path_buf(),
        })
    }

    async fn resolve(&self) -> Result<ResolvedArtifact, DiskError> {
        tracing::info!("Looking up machine image at {} to create VM", self.reference);

        let raw = self.source.get_manifest(&self.reference).await?;
        let Manifest::List(list) = &raw.manifest else {
            return Err(DiskError::NotManifestList {
                reference: self.reference.to_string(),
                media_type: raw.content_type,
            });
        };

        let instance = list
            .manifests
            .iter()
            .find(|m| self.key.matches(m))
            .ok_or_else(|| DiskError::NoMatchingArtifact {
                arch: self.key.arch.clone(),
                os: self.key.os.clone(),
                disk_type: self.key.disk_type.clone(),
            })?;

        let reference = self.reference.with_digest(&instance.digest);
        let raw = self.source.get_manifest(&reference).await?;
        let layers = raw.manifest.layers().unwrap_or_default();
        let [layer] = layers else {
            return Err(DiskError::LayerCount {
                digest: instance.digest.clone(),
                count: layers.len(),
            });
        };

        let title = layer
            .annotation(ANNOTATION_TITLE)
            .ok_or_else(|| DiskError::MissingAnnotation {
                digest: layer.digest.clone(),
                annotation: ANNOTATION_TITLE.to_string(),
            })?;

        let layer_digest = Digest::parse(&layer.digest)?;
        let cache_path = self.cache_dir.join(format!(
            "{}{}",
            layer_digest.encoded(),
            extract_kind_and_compression(title)
        ));

        Ok(ResolvedArtifact {
            reference,
            layer_digest,
            cache_path,
        })
    }

    /// Cache entries belonging to earlier default images. `current` is
    /// never listed, even if another process cached it meanwhile.
    async fn stale_cache_entries(&self, current: &Path) -> Result<Vec<PathBuf>, DiskError> {
        let mut stale = Vec::new();
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stale),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if starts_with_digest(&name.to_string_lossy()) && entry.path() != current {
                stale.push(entry.path());
            }
        }
        Ok(stale)
    }

    /// Pulls the artifact into a scratch layout of its own and moves its
    /// layer blob to `cache_path`.
    ///
    /// Concurrent pulls of the same digest each get their own scratch
    /// directory; whichever lands in the cache last replaces an identical
    /// file.
    async fn pull_and_unpack(&self, artifact: &ResolvedArtifact) -> Result<(), DiskError> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.cache_dir)?;
        let mut result = self.pull_into(artifact, scratch.path()).await;
        if let Err(e) = &result
            && fs::try_exists(&artifact.cache_path).await.unwrap_or(false)
        {
            tracing::debug!("Pull failed ({}) but {:?} is cached", e, artifact.cache_path);
            result = Ok(());
        }

        if let Err(e) = fs::remove_dir_all(scratch.path()).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove {:?}: {}", scratch.path(), e);
        }
        result
    }

    async fn pull_into(&self, artifact: &ResolvedArtifact, scratch: &Path) -> Result<(), DiskError> {
        self.source.pull(&artifact.reference, scratch).await?;

        let layout = OciLayout::open(scratch).await?;
        let (layer, blob_path) = layout.single_layer().await?;
        if Digest::parse(&layer.digest)? != artifact.layer_digest {
            return Err(DiskError::NotFound(format!(
                "{} in pulled image {}",
                artifact.layer_digest, artifact.reference
            )));
        }

        match fs::rename(&blob_path, &artifact.cache_path).await {
            Ok(()) => {}
            Err(e) => {
                tracing::debug!("Rename into cache failed ({}), copying instead", e);
                let partial = scratch.join("disk.partial");

                let (src, dst) = (blob_path.clone(), partial.clone());
                tokio::task::spawn_blocking(move || berth_compress::copy_sparse(&src, &dst))
                    .await??;
                fs::rename(&partial, &artifact.cache_path).await?;
            }
        }

        tracing::info!(
            digest = %artifact.layer_digest,
            path = ?artifact.cache_path,
            "Cached disk artifact"
        );
        Ok(())
    }

    /// Makes sure the compressed artifact is in the cache and returns its
    /// path and the files to delete once the caller is done with it.
    async fn fetch(&self) -> Result<(PathBuf, Vec<PathBuf>), DiskError> {
        fs::create_dir_all(&self.cache_dir).await?;
        let artifact = self.resolve().await?;

        if fs::try_exists(&artifact.cache_path).await? {
            tracing::debug!("Using cached disk artifact {:?}", artifact.cache_path);
            let cleanup = if self.is_default {
                Vec::new()
            } else {
                vec![artifact.cache_path.clone()]
            };
            return Ok((artifact.cache_path, cleanup));
        }

        let cleanup = if self.is_default {
            self.stale_cache_entries(&artifact.cache_path).await?
        } else {
            vec![artifact.cache_path.clone()]
        };

        match self.pull_and_unpack(&artifact).await {
            Ok(()) => Ok((artifact.cache_path, cleanup)),
            Err(e) => {
                remove_all(&cleanup).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Disker for OciArtifactDisk {
    async fn get(&self) -> Result<(), DiskError> {
        let (cached, cleanup) = self.fetch().await?;

        let final_path = self.final_path.clone();
        let src = cached.clone();
        let result = tokio::task::spawn_blocking(move || berth_compress::decompress(&src, &final_path))
            .await
            .map_err(DiskError::from)
            .and_then(|r| r.map_err(DiskError::from));

        remove_all(&cleanup).await;
        result
    }
}

fn starts_with_digest(name: &str) -> bool {
    let hex = name.as_bytes();
    hex.len() >= 64
        && hex[..64]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
        && hex.get(64).is_none_or(|&b| b == b'.')
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        let result = match fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
            Ok(_) => fs::remove_file(path).await,
            Err(_) => continue,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to remove cached file {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_remote::{
        Descriptor, MEDIA_TYPE_OCI_EMPTY, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
        ManifestList, ManifestV2, Platform, RawManifest,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Image {
        manifest: Vec<u8>,
        config: Vec<u8>,
        layers: Vec<Vec<u8>>,
    }

    #[derive(Default)]
    struct FakeRegistry {
        lists: Mutex<HashMap<String, Vec<u8>>>,
        images: Mutex<HashMap<String, Image>>,
        pulls: AtomicUsize,
        pull_delay: Duration,
    }

    fn raw(content_type: &str, bytes: Vec<u8>) -> RawManifest {
        RawManifest {
            manifest: Manifest::from_slice(content_type, &bytes).unwrap(),
            content_type: content_type.to_string(),
            digest: Digest::of(&bytes).to_string(),
            bytes,
        }
    }

    #[async_trait]
    impl ArtifactSource for FakeRegistry {
        async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest, DiskError> {
            if let Some(digest) = &reference.digest {
                let images = self.images.lock().unwrap();
                let image = images
                    .get(digest)
                    .ok_or_else(|| DiskError::NotFound(digest.clone()))?;
                return Ok(raw(MEDIA_TYPE_OCI_MANIFEST, image.manifest.clone()));
            }

            let lists = self.lists.lock().unwrap();
            let (content_type, bytes) = lists
                .get(&reference.full_name())
                .map(|b| (MEDIA_TYPE_OCI_INDEX, b.clone()))
                .ok_or_else(|| DiskError::NotFound(reference.to_string()))?;
            Ok(raw(content_type, bytes))
        }

        async fn pull(&self, reference: &ImageReference, dest: &Path) -> Result<(), DiskError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.pull_delay).await;
            let (manifest, config, layers) = {
                let images = self.images.lock().unwrap();
                let digest = reference.digest.clone().unwrap_or_default();
                let image = images
                    .get(&digest)
                    .ok_or_else(|| DiskError::NotFound(digest.clone()))?;
                (image.manifest.clone(), image.config.clone(), image.layers.clone())
            };

            let layout = OciLayout::create(dest).await?;
            let digest = layout.put_blob(&manifest, None).await?;
            layout.put_blob(&config, None).await?;
            for layer in &layers {
                layout.put_blob(layer, None).await?;
            }
            layout
                .set_manifest(ManifestDescriptor {
                    media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
                    digest: digest.to_string(),
                    size: manifest.len() as i64,
                    platform: None,
                    annotations: HashMap::new(),
                })
                .await?;
            Ok(())
        }
    }

    fn layer(data: &[u8], title: Option<&str>) -> Descriptor {
        let mut annotations = HashMap::new();
        if let Some(title) = title {
            annotations.insert(ANNOTATION_TITLE.to_string(), title.to_string());
        }
        Descriptor {
            media_type: "application/x-xz".to_string(),
            digest: Digest::of(data).to_string(),
            size: data.len() as i64,
            urls: vec![],
            annotations,
        }
    }

    impl FakeRegistry {
        /// Publishes a one-entry manifest list under `name`.
        fn publish(&self, name: &str, disk_type: &str, layers: Vec<(Vec<u8>, Option<&str>)>) {
            let config = b"{}".to_vec();
            let manifest = ManifestV2 {
                schema_version: 2,
                media_type: Some(MEDIA_TYPE_OCI_MANIFEST.to_string()),
                artifact_type: None,
                config: Descriptor {
                    media_type: MEDIA_TYPE_OCI_EMPTY.to_string(),
                    digest: Digest::of(&config).to_string(),
                    size: config.len() as i64,
                    urls: vec![],
                    annotations: HashMap::new(),
                },
                layers: layers.iter().map(|(d, t)| layer(d, *t)).collect(),
                annotations: HashMap::new(),
            };
            let manifest = serde_json::to_vec(&manifest).unwrap();
            let manifest_digest = Digest::of(&manifest).to_string();

            let mut annotations = HashMap::new();
            annotations.insert(ANNOTATION_DISK_TYPE.to_string(), disk_type.to_string());
            let list = ManifestList {
                schema_version: 2,
                media_type: Some(MEDIA_TYPE_OCI_INDEX.to_string()),
                manifests: vec![ManifestDescriptor {
                    media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
                    digest: manifest_digest.clone(),
                    size: manifest.len() as i64,
                    platform: Some(Platform {
                        architecture: host_arch().unwrap().to_string(),
                        os: GUEST_OS.to_string(),
                        variant: None,
                        os_version: None,
                    }),
                    annotations,
                }],
            };

            self.lists.lock().unwrap().insert(
                ImageReference::parse(name).unwrap().full_name(),
                serde_json::to_vec(&list).unwrap(),
            );
            self.images.lock().unwrap().insert(
                manifest_digest,
                Image {
                    manifest,
                    config,
                    layers: layers.into_iter().map(|(d, _)| d).collect(),
                },
            );
        }
    }

    struct Fixture {
        dir: TempDir,
        registry: Arc<FakeRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_registry(FakeRegistry::default())
        }

        fn with_registry(registry: FakeRegistry) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                registry: Arc::new(registry),
            }
        }

        fn cache_entries(&self) -> Vec<PathBuf> {
            let mut entries: Vec<_> = std::fs::read_dir(self.cache_dir())
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect();
            entries.sort();
            entries
        }

        fn cache_dir(&self) -> PathBuf {
            self.dir.path().join("cache")
        }

        fn disk(&self, endpoint: &str, final_name: &str) -> OciArtifactDisk {
            OciArtifactDisk::new(
                self.registry.clone(),
                endpoint,
                DiskArtifactKey::for_host(VmType::Qemu).unwrap(),
                VmType::Qemu,
                &self.cache_dir(),
                &self.dir.path().join(final_name),
            )
            .unwrap()
        }
    }

    const CUSTOM: &str = "docker://registry.example.com/os/disk:1";

    #[test]
    fn test_extract_kind_and_compression() {
        assert_eq!(
            extract_kind_and_compression("fedora-coreos-qemu.x86_64.qcow2.xz"),
            ".qcow2.xz"
        );
        assert_eq!(extract_kind_and_compression("disk.raw"), ".raw");
        assert_eq!(extract_kind_and_compression("disk"), "");
    }

    #[test]
    fn test_default_image_reference() {
        let reference = default_image_reference(VmType::Qemu);
        assert_eq!(
            reference,
            format!("docker://quay.io/podman/machine-os:{}", MACHINE_OS_VERSION)
        );
        assert_ne!(MACHINE_OS_VERSION, env!("CARGO_PKG_VERSION"));
        assert!(default_image_reference(VmType::Wsl).contains("/machine-os-wsl:"));
    }

    #[test]
    fn test_normalize_arch() {
        assert_eq!(normalize_arch("amd64").unwrap(), "x86_64");
        assert_eq!(normalize_arch("arm64").unwrap(), "aarch64");
        assert!(matches!(
            normalize_arch("riscv64"),
            Err(DiskError::UnsupportedArch(_))
        ));
    }

    #[test]
    fn test_starts_with_digest() {
        let hex = "a".repeat(64);
        assert!(starts_with_digest(&hex));
        assert!(starts_with_digest(&format!("{}.qcow2.xz", hex)));
        assert!(!starts_with_digest(&format!("{}x", hex)));
        assert!(!starts_with_digest("notes.txt"));
        assert!(!starts_with_digest(&"A".repeat(64)));
    }

    #[tokio::test]
    async fn test_cached_artifact_is_pulled_once() {
        let fx = Fixture::new();
        let layer = b"compressed disk bytes".to_vec();
        fx.registry
            .publish(CUSTOM, "qemu", vec![(layer.clone(), Some("disk.qcow2.xz"))]);

        let (cached, cleanup) = fx.disk(CUSTOM, "one.qcow2").fetch().await.unwrap();
        assert_eq!(
            cached,
            fx.cache_dir()
                .join(format!("{}.qcow2.xz", Digest::of(&layer).encoded()))
        );
        assert_eq!(std::fs::read(&cached).unwrap(), layer);
        assert_eq!(cleanup, vec![cached.clone()]);
        assert_eq!(fx.registry.pulls.load(Ordering::SeqCst), 1);

        let (again, _) = fx.disk(CUSTOM, "two.qcow2").fetch().await.unwrap();
        assert_eq!(again, cached);
        assert_eq!(fx.registry.pulls.load(Ordering::SeqCst), 1);

        // The scratch layout is gone once the blob is cached.
        assert_eq!(fx.cache_entries(), vec![cached]);
    }

    #[tokio::test]
    async fn test_concurrent_default_pulls_share_cache() {
        let fx = Fixture::with_registry(FakeRegistry {
            pull_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let disk = b"QFI\xfb shared disk".to_vec();
        fx.registry.publish(
            &default_image_reference(VmType::Qemu),
            "qemu",
            vec![(disk.clone(), Some("machine.qcow2.xz"))],
        );

        let first = fx.disk("", "one.qcow2");
        let second = fx.disk("", "two.qcow2");
        let (a, b) = tokio::join!(first.get(), second.get());
        a.unwrap();
        b.unwrap();

        assert_eq!(std::fs::read(fx.dir.path().join("one.qcow2")).unwrap(), disk);
        assert_eq!(std::fs::read(fx.dir.path().join("two.qcow2")).unwrap(), disk);
        let cached = fx
            .cache_dir()
            .join(format!("{}.qcow2.xz", Digest::of(&disk).encoded()));
        assert_eq!(fx.cache_entries(), vec![cached]);
    }

    #[tokio::test]
    async fn test_current_entry_is_never_stale() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.cache_dir()).unwrap();
        let current = fx.cache_dir().join(format!("{}.qcow2.xz", "c".repeat(64)));
        let old = fx.cache_dir().join(format!("{}.qcow2.xz", "d".repeat(64)));
        std::fs::write(&current, b"cached by another process").unwrap();
        std::fs::write(&old, b"old").unwrap();

        let stale = fx.disk("", "dev.qcow2").stale_cache_entries(&current).await.unwrap();
        assert_eq!(stale, vec![old]);
    }

    #[tokio::test]
    async fn test_get_decompresses_and_drops_custom_image() {
        let fx = Fixture::new();
        let disk = b"QFI\xfb plain disk".to_vec();
        fx.registry.publish(CUSTOM, "qemu", vec![(disk.clone(), Some("disk.qcow2"))]);

        fx.disk(CUSTOM, "dev.qcow2").get().await.unwrap();

        assert_eq!(std::fs::read(fx.dir.path().join("dev.qcow2")).unwrap(), disk);
        let leftovers: Vec<_> = std::fs::read_dir(fx.cache_dir()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_default_image_replaces_stale_entries() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.cache_dir()).unwrap();
        let stale = fx.cache_dir().join(format!("{}.qcow2.xz", "b".repeat(64)));
        let foreign = fx.cache_dir().join("README");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::write(&foreign, b"keep").unwrap();

        let disk = b"QFI\xfb fresh disk".to_vec();
        fx.registry.publish(
            &default_image_reference(VmType::Qemu),
            "qemu",
            vec![(disk.clone(), Some("machine.qcow2"))],
        );

        fx.disk("", "dev.qcow2").get().await.unwrap();

        assert!(!stale.exists());
        assert!(foreign.exists());
        let cached = fx
            .cache_dir()
            .join(format!("{}.qcow2", Digest::of(&disk).encoded()));
        assert!(cached.exists());
        assert_eq!(std::fs::read(fx.dir.path().join("dev.qcow2")).unwrap(), disk);

        // Second run reuses the cache and keeps it.
        fx.disk("", "dev2.qcow2").get().await.unwrap();
        assert!(cached.exists());
        assert_eq!(fx.registry.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_matching_disk_type() {
        let fx = Fixture::new();
        fx.registry.publish(CUSTOM, "hyperv", vec![(b"d".to_vec(), Some("d.vhdx"))]);

        match fx.disk(CUSTOM, "dev.qcow2").get().await {
            Err(DiskError::NoMatchingArtifact { disk_type, os, .. }) => {
                assert_eq!(disk_type, "qemu");
                assert_eq!(os, "linux");
            }
            other => panic!("expected no matching artifact, got {:?}", other),
        }
        assert_eq!(fx.registry.pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_multi_layer_artifact_rejected() {
        let fx = Fixture::new();
        fx.registry.publish(
            CUSTOM,
            "qemu",
            vec![
                (b"one".to_vec(), Some("a.qcow2")),
                (b"two".to_vec(), Some("b.qcow2")),
            ],
        );

        assert!(matches!(
            fx.disk(CUSTOM, "dev.qcow2").get().await,
            Err(DiskError::LayerCount { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_title_annotation() {
        let fx = Fixture::new();
        fx.registry.publish(CUSTOM, "qemu", vec![(b"d".to_vec(), None)]);

        match fx.disk(CUSTOM, "dev.qcow2").get().await {
            Err(DiskError::MissingAnnotation { annotation, .. }) => {
                assert_eq!(annotation, ANNOTATION_TITLE)
            }
            other => panic!("expected missing annotation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_manifest_is_rejected() {
        let fx = Fixture::new();
        fx.registry.publish(CUSTOM, "qemu", vec![(b"d".to_vec(), Some("d.qcow2"))]);
        let digest = fx.registry.images.lock().unwrap().keys().next().unwrap().clone();
        let pinned = format!("registry.example.com/os/disk@{}", digest);

        assert!(matches!(
            fx.disk(&pinned, "dev.qcow2").get().await,
            Err(DiskError::NotManifestList { .. })
        ));
    }
}
