use crate::error::MachineError;
use crate::paths::MachineDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    Qemu,
    AppleHv,
    LibKrun,
    HyperV,
    Wsl,
}

impl VmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmType::Qemu => "qemu",
            VmType::AppleHv => "applehv",
            VmType::LibKrun => "libkrun",
            VmType::HyperV => "hyperv",
            VmType::Wsl => "wsl",
        }
    }

    /// The `disktype` annotation value of the disk artifact this backend boots.
    pub fn disk_type(&self) -> &'static str {
        match self {
            VmType::Qemu => "qemu",
            VmType::AppleHv | VmType::LibKrun => "applehv",
            VmType::HyperV => "hyperv",
            VmType::Wsl => "wsl",
        }
    }

    /// File extension of the decompressed disk image.
    pub fn image_format(&self) -> &'static str {
        match self {
            VmType::Qemu => "qcow2",
            VmType::AppleHv | VmType::LibKrun => "raw",
            VmType::HyperV => "vhdx",
            VmType::Wsl => "tar",
        }
    }
}

impl std::fmt::Display for VmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VmType {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qemu" => Ok(VmType::Qemu),
            "applehv" => Ok(VmType::AppleHv),
            "libkrun" => Ok(VmType::LibKrun),
            "hyperv" => Ok(VmType::HyperV),
            "wsl" => Ok(VmType::Wsl),
            other => Err(MachineError::UnknownVmType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    pub port: u16,
    pub identity_path: PathBuf,
    pub remote_username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUser {
    pub uid: u32,
    pub rootful: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

/// Persisted state of one machine, stored as `<config-dir>/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    pub vm_type: VmType,
    pub ssh: SshConfig,
    pub host_user: HostUser,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub starting: bool,
    pub created_at: i64,
    pub last_up: Option<i64>,

    #[serde(skip)]
    config_path: PathBuf,
}

impl MachineConfig {
    pub fn new(
        name: &str,
        vm_type: VmType,
        dirs: &MachineDirs,
        ssh: SshConfig,
        host_user: HostUser,
    ) -> Self {
        Self {
            name: name.to_string(),
            vm_type,
            ssh,
            host_user,
            mounts: Vec::new(),
            image_path: None,
            starting: false,
            created_at: unix_now(),
            last_up: None,
            config_path: Self::path_for(dirs, name),
        }
    }

    fn path_for(dirs: &MachineDirs, name: &str) -> PathBuf {
        dirs.config_dir.join(format!("{}.json", name))
    }

    pub async fn load(dirs: &MachineDirs, name: &str) -> Result<Self, MachineError> {
        let path = Self::path_for(dirs, name);
        let content = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MachineError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut config: MachineConfig = serde_json::from_slice(&content)?;
        config.config_path = path;
        Ok(config)
    }

    pub async fn write(&self) -> Result<(), MachineError> {
        write_atomic(&self.config_path, &serde_json::to_vec_pretty(self)?).await
    }

    /// Rereads the on-disk copy, dropping unsaved changes.
    pub async fn refresh(&mut self) -> Result<(), MachineError> {
        let content = match fs::read(&self.config_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MachineError::NotFound(self.name.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let config_path = std::mem::take(&mut self.config_path);
        *self = serde_json::from_slice(&content)?;
        self.config_path = config_path;
        Ok(())
    }

    /// Every machine with a config in `dirs`, sorted by name.
    pub async fn list(dirs: &MachineDirs) -> Result<Vec<MachineConfig>, MachineError> {
        let mut entries = match fs::read_dir(&dirs.config_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut configs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Self::load(dirs, name).await {
                Ok(config) => configs.push(config),
                Err(e) => tracing::warn!("Skipping unreadable machine config {:?}: {}", path, e),
            }
        }

        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Lock file serializing lifecycle changes to this machine.
    pub fn lock_path(&self) -> PathBuf {
        self.config_path.with_extension("lck")
    }

    /// Socket the guest connects to once it has booted.
    pub fn ready_socket(&self, dirs: &MachineDirs) -> PathBuf {
        dirs.runtime_dir.join(format!("{}.sock", self.name))
    }

    /// Host end of the forwarded container API socket.
    pub fn api_socket(&self, dirs: &MachineDirs) -> PathBuf {
        dirs.runtime_dir.join(format!("{}-api.sock", self.name))
    }

    pub fn mark_up(&mut self) {
        self.last_up = Some(unix_now());
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Replaces `path` with `content` through a synced sibling temp file.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), MachineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(dirs: &MachineDirs) -> MachineConfig {
        MachineConfig::new(
            "dev",
            VmType::Qemu,
            dirs,
            SshConfig {
                port: 2222,
                identity_path: PathBuf::from("/home/u/.ssh/machine"),
                remote_username: "core".to_string(),
            },
            HostUser {
                uid: 1000,
                rootful: false,
            },
        )
    }

    #[tokio::test]
    async fn test_write_and_load() {
        let root = TempDir::new().unwrap();
        let dirs = MachineDirs::under(root.path(), VmType::Qemu);
        let mut config = sample(&dirs);
        config.mounts.push(Mount {
            source: PathBuf::from("/src"),
            target: PathBuf::from("/dst"),
            read_only: true,
        });
        config.write().await.unwrap();

        let loaded = MachineConfig::load(&dirs, "dev").await.unwrap();
        assert_eq!(loaded.ssh, config.ssh);
        assert_eq!(loaded.mounts, config.mounts);
        assert_eq!(loaded.config_path(), dirs.config_dir.join("dev.json"));
        assert!(!dirs.config_dir.join("dev.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let root = TempDir::new().unwrap();
        let dirs = MachineDirs::under(root.path(), VmType::Qemu);
        assert!(matches!(
            MachineConfig::load(&dirs, "nope").await,
            Err(MachineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_drops_unsaved_changes() {
        let root = TempDir::new().unwrap();
        let dirs = MachineDirs::under(root.path(), VmType::Qemu);
        let mut config = sample(&dirs);
        config.write().await.unwrap();

        let mut stale = MachineConfig::load(&dirs, "dev").await.unwrap();
        config.ssh.port = 3333;
        config.write().await.unwrap();

        stale.starting = true;
        stale.refresh().await.unwrap();
        assert_eq!(stale.ssh.port, 3333);
        assert!(!stale.starting);
        assert_eq!(stale.config_path(), config.config_path());
    }

    #[tokio::test]
    async fn test_list_skips_other_files() {
        let root = TempDir::new().unwrap();
        let dirs = MachineDirs::under(root.path(), VmType::Qemu);
        assert!(MachineConfig::list(&dirs).await.unwrap().is_empty());

        let mut other = sample(&dirs);
        other.name = "other".to_string();
        other.config_path = dirs.config_dir.join("other.json");
        other.write().await.unwrap();
        sample(&dirs).write().await.unwrap();
        std::fs::write(dirs.config_dir.join("dev.lck"), b"").unwrap();
        std::fs::write(dirs.config_dir.join("broken.json"), b"{").unwrap();

        let names: Vec<_> = MachineConfig::list(&dirs)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["dev", "other"]);
    }

    #[test]
    fn test_socket_paths() {
        let dirs = MachineDirs::under(Path::new("/r"), VmType::Qemu);
        let config = sample(&dirs);
        assert_eq!(config.ready_socket(&dirs), Path::new("/r/run/podman/dev.sock"));
        assert_eq!(config.api_socket(&dirs), Path::new("/r/run/podman/dev-api.sock"));
        assert_eq!(config.lock_path(), dirs.config_dir.join("dev.lck"));
    }

    #[test]
    fn test_vm_type_mapping() {
        assert_eq!(VmType::LibKrun.disk_type(), "applehv");
        assert_eq!(VmType::LibKrun.image_format(), "raw");
        assert_eq!(VmType::HyperV.image_format(), "vhdx");
        assert_eq!(VmType::Wsl.image_format(), "tar");
        assert_eq!("QEMU".parse::<VmType>().unwrap(), VmType::Qemu);
        assert!("vbox".parse::<VmType>().is_err());
    }
}
