use crate::artifact::{DiskArtifactKey, OciArtifactDisk, host_arch};
use crate::error::DiskError;
use crate::source::ArtifactSource;
use async_trait::async_trait;
use berth_machine::{MachineDirs, VmType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const DOCKER_TRANSPORT: &str = "docker://";

/// Something that can produce a machine's boot disk at its final path.
#[async_trait]
pub trait Disker: Send + Sync {
    async fn get(&self) -> Result<(), DiskError>;
}

/// Where the user asked the disk to come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSource {
    /// Empty input or a `docker://` reference.
    Oci(String),
    Url(String),
    Local(PathBuf),
}

impl DiskSource {
    pub fn parse(input: &str) -> Self {
        if input.is_empty() || input.starts_with(DOCKER_TRANSPORT) {
            DiskSource::Oci(input.to_string())
        } else if input.starts_with("http") {
            DiskSource::Url(input.to_string())
        } else {
            DiskSource::Local(PathBuf::from(input))
        }
    }
}

/// `<data-dir>/<name>-<arch>.<format>`
pub fn final_disk_path(
    dirs: &MachineDirs,
    name: &str,
    vm_type: VmType,
) -> Result<PathBuf, DiskError> {
    Ok(dirs.data_dir.join(format!(
        "{}-{}.{}",
        name,
        host_arch()?,
        vm_type.image_format()
    )))
}

/// Acquires the disk described by `input` and writes it to `final_path`.
pub async fn get_disk(
    input: &str,
    dirs: &MachineDirs,
    final_path: &Path,
    vm_type: VmType,
    source: Arc<dyn ArtifactSource>,
) -> Result<(), DiskError> {
    let disker: Box<dyn Disker> = match DiskSource::parse(input) {
        DiskSource::Oci(endpoint) => Box::new(OciArtifactDisk::new(
            source,
            &endpoint,
            DiskArtifactKey::for_host(vm_type)?,
            vm_type,
            &dirs.image_cache_dir,
            final_path,
        )?),
        DiskSource::Url(url) => Box::new(UrlDisk::new(&url, &dirs.image_cache_dir, final_path)),
        DiskSource::Local(path) => Box::new(LocalDisk::new(&path, final_path)),
    };
    disker.get().await
}

/// A disk image already on the host.
pub struct LocalDisk {
    path: PathBuf,
    final_path: PathBuf,
}

impl LocalDisk {
    pub fn new(path: &Path, final_path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            final_path: final_path.to_path_buf(),
        }
    }
}

#[async_trait]
impl Disker for LocalDisk {
    async fn get(&self) -> Result<(), DiskError> {
        if !fs::try_exists(&self.path).await? {
            return Err(DiskError::NotFound(self.path.display().to_string()));
        }
        decompress(&self.path, &self.final_path).await
    }
}

/// A disk image downloaded over HTTP into the cache directory first.
pub struct UrlDisk {
    url: String,
    download_path: PathBuf,
    final_path: PathBuf,
}

impl UrlDisk {
    pub fn new(url: &str, cache_dir: &Path, final_path: &Path) -> Self {
        let file_name = url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|name| !name.is_empty() && !name.contains(':'))
            .unwrap_or("download");

        Self {
            url: url.to_string(),
            download_path: cache_dir.join(file_name),
            final_path: final_path.to_path_buf(),
        }
    }

    async fn download(&self) -> Result<(), DiskError> {
        if let Some(parent) = self.download_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        tracing::info!("Downloading VM image: {}", self.url);
        let mut response = reqwest::get(&self.url).await?;
        if !response.status().is_success() {
            return Err(DiskError::Download {
                url: self.url.clone(),
                status: response.status().to_string(),
            });
        }

        let mut file = fs::File::create(&self.download_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.sync_all().await?;

        tracing::debug!(path = ?self.download_path, size = written, "Download complete");
        Ok(())
    }
}

#[async_trait]
impl Disker for UrlDisk {
    async fn get(&self) -> Result<(), DiskError> {
        let result = match self.download().await {
            Ok(()) => decompress(&self.download_path, &self.final_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = fs::remove_file(&self.download_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove {:?}: {}", self.download_path, e);
        }
        result
    }
}

async fn decompress(src: &Path, dst: &Path) -> Result<(), DiskError> {
    let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || berth_compress::decompress(&src, &dst)).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_source() {
        assert_eq!(DiskSource::parse(""), DiskSource::Oci(String::new()));
        assert_eq!(
            DiskSource::parse("docker://quay.io/podman/machine-os:5.0"),
            DiskSource::Oci("docker://quay.io/podman/machine-os:5.0".to_string())
        );
        assert_eq!(
            DiskSource::parse("https://example.com/disk.qcow2.xz"),
            DiskSource::Url("https://example.com/disk.qcow2.xz".to_string())
        );
        assert_eq!(
            DiskSource::parse("/var/tmp/disk.raw"),
            DiskSource::Local(PathBuf::from("/var/tmp/disk.raw"))
        );
    }

    #[test]
    fn test_final_disk_path() {
        let tmp = TempDir::new().unwrap();
        let dirs = MachineDirs::under(tmp.path(), VmType::Qemu);
        let path = final_disk_path(&dirs, "dev", VmType::Qemu).unwrap();

        assert_eq!(path.parent().unwrap(), dirs.data_dir);
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("dev-{}.qcow2", host_arch().unwrap())
        );
    }

    #[test]
    fn test_download_name() {
        let tmp = TempDir::new().unwrap();
        let final_path = tmp.path().join("disk");
        let disk = UrlDisk::new("https://example.com/a/os.raw.zst?sig=1", tmp.path(), &final_path);
        assert_eq!(disk.download_path, tmp.path().join("os.raw.zst"));

        let disk = UrlDisk::new("http://example.com/", tmp.path(), &final_path);
        assert_eq!(disk.download_path, tmp.path().join("download"));
    }

    #[tokio::test]
    async fn test_local_disk() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.raw");
        let dst = tmp.path().join("dev.raw");
        std::fs::write(&src, b"raw disk").unwrap();

        LocalDisk::new(&src, &dst).get().await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"raw disk");
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_local_disk_missing() {
        let tmp = TempDir::new().unwrap();
        let result = LocalDisk::new(&tmp.path().join("nope"), &tmp.path().join("dst"))
            .get()
            .await;
        assert!(matches!(result, Err(DiskError::NotFound(_))));
    }

    /// Serves one HTTP/1.1 response and returns the base URL.
    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                status,
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_url_disk_downloads_then_removes() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let dst = tmp.path().join("dev.raw");
        let base = serve_once("200 OK", b"downloaded disk").await;

        let disk = UrlDisk::new(&format!("{}/images/os.raw", base), &cache, &dst);
        disk.get().await.unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"downloaded disk");
        assert!(!cache.join("os.raw").exists());
    }

    #[tokio::test]
    async fn test_url_disk_http_error() {
        let tmp = TempDir::new().unwrap();
        let base = serve_once("404 Not Found", b"").await;

        let disk = UrlDisk::new(
            &format!("{}/missing.raw", base),
            tmp.path(),
            &tmp.path().join("dst"),
        );
        match disk.get().await {
            Err(DiskError::Download { status, .. }) => assert!(status.starts_with("404")),
            other => panic!("expected download error, got {:?}", other),
        }
        assert!(!tmp.path().join("dst").exists());
    }
}
