use crate::error::MachineError;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;

/// Command line of the host-to-guest forwarding process.
#[derive(Debug, Clone, Default)]
pub struct GvproxyCommand {
    pub ssh_port: u16,
    pub pid_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub debug: bool,
    pub mtu: Option<u32>,
    pub vfkit_socket: Option<String>,
    pub qemu_socket: Option<String>,
    endpoints: Vec<String>,
    forward_socks: Vec<PathBuf>,
    forward_dests: Vec<String>,
    forward_users: Vec<String>,
    forward_identities: Vec<PathBuf>,
}

impl GvproxyCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(&mut self, endpoint: &str) {
        self.endpoints.push(endpoint.to_string());
    }

    /// Forwards host socket `sock` to `dest` in the guest over SSH.
    pub fn add_forward(&mut self, sock: &Path, dest: &str, user: &str, identity: &Path) {
        self.forward_socks.push(sock.to_path_buf());
        self.forward_dests.push(dest.to_string());
        self.forward_users.push(user.to_string());
        self.forward_identities.push(identity.to_path_buf());
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        for endpoint in &self.endpoints {
            args.extend(["-listen".to_string(), endpoint.clone()]);
        }
        if let Some(socket) = &self.vfkit_socket {
            args.extend(["-listen-vfkit".to_string(), socket.clone()]);
        }
        if let Some(socket) = &self.qemu_socket {
            args.extend(["-listen-qemu".to_string(), socket.clone()]);
        }
        if let Some(mtu) = self.mtu {
            args.extend(["-mtu".to_string(), mtu.to_string()]);
        }
        if self.debug {
            args.push("-debug".to_string());
        }

        let forwards = self
            .forward_socks
            .iter()
            .zip(&self.forward_dests)
            .zip(&self.forward_users)
            .zip(&self.forward_identities);
        for (((sock, dest), user), identity) in forwards {
            args.extend([
                "-forward-sock".to_string(),
                sock.display().to_string(),
                "-forward-dest".to_string(),
                dest.clone(),
                "-forward-user".to_string(),
                user.clone(),
                "-forward-identity".to_string(),
                identity.display().to_string(),
            ]);
        }

        if let Some(pid_file) = &self.pid_file {
            args.extend(["-pid-file".to_string(), pid_file.display().to_string()]);
        }
        if let Some(log_file) = &self.log_file {
            args.extend(["-log-file".to_string(), log_file.display().to_string()]);
        }
        args.extend(["-ssh-port".to_string(), self.ssh_port.to_string()]);

        args
    }

    /// Starts the forwarder in the background. It writes its own PID file.
    pub fn launch(&self, binary: &Path) -> Result<(), MachineError> {
        let args = self.to_args();
        tracing::debug!("gvproxy command-line: {} {}", binary.display(), args.join(" "));

        tokio::process::Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                MachineError::Forwarder(format!("unable to execute {}: {}", binary.display(), e))
            })?;

        tracing::info!(ssh_port = self.ssh_port, "Started forwarding process");
        Ok(())
    }
}

/// Stops the forwarder recorded in `pid_file` and removes the file.
///
/// A missing PID file or an already-exited process is not an error.
pub async fn cleanup_gvproxy(pid_file: &Path) -> Result<(), MachineError> {
    let content = match fs::read_to_string(pid_file).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No forwarder PID file at {:?}", pid_file);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    // 0 and negative values address process groups, never a single forwarder.
    let pid = content
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| {
            MachineError::Forwarder(format!("invalid pid {:?} in {:?}", content.trim(), pid_file))
        })?;

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => tracing::debug!(pid, "Sent SIGTERM to forwarding process"),
        Err(Errno::ESRCH) => tracing::debug!(pid, "Forwarding process already gone"),
        Err(e) => return Err(e.into()),
    }

    match fs::remove_file(pid_file).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
