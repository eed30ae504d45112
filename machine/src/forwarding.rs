use crate::config::MachineConfig;
use crate::error::MachineError;
use crate::gvproxy::GvproxyCommand;
use crate::paths::MachineDirs;
use std::path::{Path, PathBuf};

pub(crate) const ROOTFUL_GUEST_SOCKET: &str = "/run/podman/podman.sock";

pub(crate) fn rootless_guest_socket(uid: u32) -> String {
    format!("/run/user/{}/podman/podman.sock", uid)
}

/// How the container API socket ended up exposed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingState {
    /// The provider runs its own networking; nothing was forwarded here.
    NoForwarding,
    ClaimUnsupported,
    NotInstalled,
    MachineLocal,
    DockerGlobal,
}

impl std::fmt::Display for ForwardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ForwardingState::NoForwarding => "no-forwarding",
            ForwardingState::ClaimUnsupported => "claim-unsupported",
            ForwardingState::NotInstalled => "not-installed",
            ForwardingState::MachineLocal => "machine-local",
            ForwardingState::DockerGlobal => "docker-global",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForwardingOptions {
    /// A system-wide socket (e.g. `/var/run/docker.sock`) to claim.
    pub global_socket: Option<PathBuf>,
    /// Helper that must be installed before the global socket is claimed.
    pub claim_helper: Option<PathBuf>,
}

/// Guest API socket and the user it is reached as.
pub fn guest_socket(mc: &MachineConfig) -> (String, String) {
    if mc.host_user.rootful {
        (ROOTFUL_GUEST_SOCKET.to_string(), "root".to_string())
    } else {
        (
            rootless_guest_socket(mc.host_user.uid),
            mc.ssh.remote_username.clone(),
        )
    }
}

fn already_linked(target: &Path, link: &Path) -> bool {
    std::fs::read_link(link).is_ok_and(|dest| dest == target)
}

#[cfg(unix)]
fn socket_in_use(path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

/// Repoints `link` at `target` unless something is listening on it.
#[cfg(unix)]
fn claim_link(target: &Path, link: &Path) -> bool {
    if already_linked(target, link) {
        return true;
    }
    if socket_in_use(link) {
        return false;
    }

    let _ = std::fs::remove_file(link);
    match std::os::unix::fs::symlink(target, link) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Could not link {:?} to {:?}: {}", link, target, e);
            false
        }
    }
}

/// Adds the API socket forward to `cmd` and classifies how it is exposed.
///
/// The link chain is `global socket -> user link -> machine API socket`, so
/// a claimed global socket never has to change when machines switch.
pub(crate) fn setup_api_forwarding(
    mc: &MachineConfig,
    dirs: &MachineDirs,
    options: &ForwardingOptions,
    cmd: &mut GvproxyCommand,
) -> Result<(PathBuf, ForwardingState), MachineError> {
    let socket = mc.api_socket(dirs);
    let (dest, user) = guest_socket(mc);
    cmd.add_forward(&socket, &dest, &user, &mc.ssh.identity_path);

    classify(&socket, dirs, options)
}

#[cfg(not(unix))]
fn classify(
    socket: &Path,
    _dirs: &MachineDirs,
    _options: &ForwardingOptions,
) -> Result<(PathBuf, ForwardingState), MachineError> {
    Ok((socket.to_path_buf(), ForwardingState::ClaimUnsupported))
}

#[cfg(unix)]
fn classify(
    socket: &Path,
    dirs: &MachineDirs,
    options: &ForwardingOptions,
) -> Result<(PathBuf, ForwardingState), MachineError> {
    let machine_local = Ok((socket.to_path_buf(), ForwardingState::MachineLocal));

    let link = dirs.user_socket_link();
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !claim_link(socket, &link) {
        return machine_local;
    }

    let Some(global) = &options.global_socket else {
        return machine_local;
    };
    if !options.claim_helper.as_deref().is_some_and(Path::exists) {
        return Ok((socket.to_path_buf(), ForwardingState::NotInstalled));
    }

    if claim_link(&link, global) {
        Ok((global.clone(), ForwardingState::DockerGlobal))
    } else {
        tracing::warn!("{:?} is in use by another process", global);
        machine_local
    }
}
