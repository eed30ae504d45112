use crate::utils::registry_source;
use berth_disk::{final_disk_path, get_disk};
use berth_machine::{
    Connections, HostUser, MachineConfig, MachineDirs, MachineError, SshConfig, VmType,
};
use berth_ports::PortAllocator;
use clap::Args;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const DEFAULT_MACHINE_NAME: &str = "berth-machine-default";
const IDENTITY_FILE: &str = "machine";

#[derive(Args)]
pub struct InitArgs {
    /// Machine name
    #[arg(default_value = DEFAULT_MACHINE_NAME)]
    pub name: String,

    /// OCI reference, http(s) URL or local file; defaults to the release image
    #[arg(long, default_value = "")]
    pub image: String,

    /// User the host connects to inside the guest
    #[arg(long, default_value = "core")]
    pub username: String,

    /// Route the default connection to the rootful API socket
    #[arg(long)]
    pub rootful: bool,

    /// SSH private key for the guest; generated when missing
    #[arg(long)]
    pub identity: Option<PathBuf>,

    /// Make this machine's connection the default one
    #[arg(long)]
    pub now_default: bool,
}

pub async fn handle_init(
    dirs: &MachineDirs,
    vm_type: VmType,
    insecure: bool,
    args: InitArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    match MachineConfig::load(dirs, &args.name).await {
        Ok(_) => return Err(format!("machine {} already exists", args.name).into()),
        Err(MachineError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    dirs.create_all().await?;
    let identity = match args.identity.clone() {
        Some(path) => path,
        None => dirs.global_data_dir.join(IDENTITY_FILE),
    };
    ensure_identity(&identity).await?;

    let allocator = PortAllocator::new(&dirs.global_data_dir);
    let ports = allocator.clone();
    let port = tokio::task::spawn_blocking(move || ports.allocate()).await??;

    let result = create_machine(dirs, vm_type, insecure, &args, &identity, port).await;
    if result.is_err()
        && let Err(e) = tokio::task::spawn_blocking(move || allocator.release(port)).await?
    {
        tracing::warn!("Failed to release port {}: {}", port, e);
    }
    result
}

async fn create_machine(
    dirs: &MachineDirs,
    vm_type: VmType,
    insecure: bool,
    args: &InitArgs,
    identity: &Path,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let final_path = final_disk_path(dirs, &args.name, vm_type)?;
    get_disk(&args.image, dirs, &final_path, vm_type, registry_source(insecure)?).await?;

    let ssh = SshConfig {
        port,
        identity_path: identity.to_path_buf(),
        remote_username: args.username.clone(),
    };
    let uid = nix::unistd::getuid().as_raw();
    let host_user = HostUser {
        uid,
        rootful: args.rootful,
    };

    let mut mc = MachineConfig::new(&args.name, vm_type, dirs, ssh, host_user);
    mc.image_path = Some(final_path);
    mc.write().await?;

    let mut connections = Connections::load(&dirs.connections_file).await?;
    connections.add_pair(
        &args.name,
        port,
        identity,
        &args.username,
        uid,
        args.now_default,
    );
    connections.save(&dirs.connections_file).await?;

    tracing::info!(name = %args.name, port, "Machine initialized");
    println!("Machine {} created (ssh port {})", args.name, port);
    Ok(())
}

async fn ensure_identity(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }

    let keygen = which::which("ssh-keygen")
        .map_err(|e| format!("ssh-keygen is needed to create {}: {}", path.display(), e))?;
    tracing::debug!("Generating SSH key {:?}", path);

    let status = Command::new(keygen)
        .args(["-N", "", "-t", "ed25519", "-q", "-f"])
        .arg(path)
        .status()
        .await?;
    if !status.success() {
        return Err(format!("ssh-keygen failed: {}", status).into());
    }
    Ok(())
}
