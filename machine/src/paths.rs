use crate::config::VmType;
use crate::error::MachineError;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "berth";
const MACHINE_DIR: &str = "machine";

/// Where a provider's machines keep their files.
///
/// `global_data_dir` is shared by every provider and holds the port
/// reservation set; the other directories are per VM type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineDirs {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub image_cache_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub global_data_dir: PathBuf,
    pub connections_file: PathBuf,
}

impl MachineDirs {
    pub fn from_roots(config_root: &Path, data_root: &Path, runtime_root: &Path, vm_type: VmType) -> Self {
        let global_data_dir = data_root.join(MACHINE_DIR);
        let data_dir = global_data_dir.join(vm_type.as_str());
        Self {
            config_dir: config_root.join(MACHINE_DIR).join(vm_type.as_str()),
            image_cache_dir: data_dir.join("cache"),
            data_dir,
            runtime_dir: runtime_root.join("podman"),
            global_data_dir,
            connections_file: config_root.join("connections.json"),
        }
    }

    /// Everything under one root, used for `--data-dir` and tests.
    pub fn under(root: &Path, vm_type: VmType) -> Self {
        Self::from_roots(&root.join("config"), &root.join("data"), &root.join("run"), vm_type)
    }

    /// The per-user default locations.
    pub fn default_for(vm_type: VmType) -> Result<Self, MachineError> {
        let config_root = dirs::config_dir()
            .ok_or_else(|| MachineError::NotFound("user config directory".to_string()))?
            .join(APP_DIR);
        let data_root = dirs::data_local_dir()
            .ok_or_else(|| MachineError::NotFound("user data directory".to_string()))?
            .join(APP_DIR);
        let runtime_root = dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        Ok(Self::from_roots(&config_root, &data_root, &runtime_root, vm_type))
    }

    pub async fn create_all(&self) -> Result<(), MachineError> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.image_cache_dir,
            &self.runtime_dir,
            &self.global_data_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn gvproxy_pid_file(&self) -> PathBuf {
        self.runtime_dir.join("gvproxy.pid")
    }

    pub fn gvproxy_log_file(&self) -> PathBuf {
        self.runtime_dir.join("gvproxy.log")
    }

    /// The user-global API socket link that points at the running machine.
    pub fn user_socket_link(&self) -> PathBuf {
        self.data_dir.join("podman.sock")
    }
}
