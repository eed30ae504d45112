use berth_disk::RegistrySource;
use berth_machine::{MachineDirs, MachineError, VmType};
use berth_remote::RegistryClient;
use std::path::Path;
use std::sync::Arc;

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

pub fn machine_dirs(data_dir: Option<&Path>, vm_type: VmType) -> Result<MachineDirs, MachineError> {
    match data_dir {
        Some(root) => Ok(MachineDirs::under(root, vm_type)),
        None => MachineDirs::default_for(vm_type),
    }
}

pub fn registry_source(insecure: bool) -> Result<Arc<RegistrySource>, Box<dyn std::error::Error>> {
    let client = RegistryClient::with_options(insecure)?;
    Ok(Arc::new(RegistrySource::new(client)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.00KB");
        assert_eq!(format_size(10 * 1024 * 1024 * 1024), "10.00GB");
    }

    #[test]
    fn test_machine_dirs_under_data_dir() {
        let tmp = TempDir::new().unwrap();
        let dirs = machine_dirs(Some(tmp.path()), VmType::Qemu).unwrap();
        assert!(dirs.data_dir.starts_with(tmp.path()));
        assert!(dirs.config_dir.starts_with(tmp.path()));
    }
}
