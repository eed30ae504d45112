use crate::config::MachineConfig;
use crate::error::MachineError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub port: u16,
    pub identity: PathBuf,
}

impl SshTarget {
    pub fn for_machine(mc: &MachineConfig) -> Self {
        Self {
            user: mc.ssh.remote_username.clone(),
            port: mc.ssh.port,
            identity: mc.ssh.identity_path.clone(),
        }
    }
}

#[async_trait]
pub trait SshRunner: Send + Sync {
    /// Runs `command` in the guest. `silent` discards its output.
    async fn run(&self, target: &SshTarget, command: &[&str], silent: bool)
    -> Result<(), MachineError>;
}

/// Runs commands through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct OpenSsh {
    binary: PathBuf,
}

impl Default for OpenSsh {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
        }
    }
}

impl OpenSsh {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(target: &SshTarget, command: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            target.identity.display().to_string(),
            "-p".to_string(),
            target.port.to_string(),
            format!("{}@localhost", target.user),
        ];
        for option in [
            "IdentitiesOnly=yes",
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
            "CheckHostIP=no",
            "LogLevel=ERROR",
            "SetEnv=LC_ALL=",
        ] {
            args.extend(["-o".to_string(), option.to_string()]);
        }
        args.push("-q".to_string());
        args.push("--".to_string());
        args.extend(command.iter().map(|s| s.to_string()));
        args
    }
}

#[async_trait]
impl SshRunner for OpenSsh {
    async fn run(
        &self,
        target: &SshTarget,
        command: &[&str],
        silent: bool,
    ) -> Result<(), MachineError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(Self::args(target, command)).stdin(Stdio::null());
        if silent {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = cmd
            .status()
            .await
            .map_err(|e| MachineError::Ssh(format!("failed to run {:?}: {}", self.binary, e)))?;

        if !status.success() {
            return Err(MachineError::Ssh(format!(
                "{}@localhost:{} {:?} exited with {}",
                target.user, target.port, command, status
            )));
        }
        Ok(())
    }
}
