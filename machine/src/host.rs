use crate::config::MachineConfig;
use crate::connection::Connections;
use crate::error::MachineError;
use crate::forwarding::{ForwardingOptions, ForwardingState, setup_api_forwarding};
use crate::gvproxy::{GvproxyCommand, cleanup_gvproxy};
use crate::lock::MachineLock;
use crate::paths::MachineDirs;
use crate::provider::{VmProvider, VmStatus};
use crate::readiness::{ReadinessPolicy, ReadinessProbe, conduct_readiness_check};
use crate::ssh::{SshRunner, SshTarget};
use async_trait::async_trait;
use berth_ports::{PortAllocator, is_locally_available};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Held while starting a machine whose provider allows one active machine.
const START_LOCK_FILE: &str = "start.lck";

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub gvproxy_binary: PathBuf,
    pub readiness: ReadinessPolicy,
    pub forwarding: ForwardingOptions,
    /// Runs the forwarder with `-debug` and a log file.
    pub debug: bool,
}

impl HostOptions {
    pub fn new(gvproxy_binary: impl Into<PathBuf>) -> Self {
        Self {
            gvproxy_binary: gvproxy_binary.into(),
            readiness: ReadinessPolicy::default(),
            forwarding: ForwardingOptions::default(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
    /// Empty when the provider runs its own networking.
    pub forward_socket: PathBuf,
    pub forwarding_state: ForwardingState,
}

/// Starts and stops machines on this host.
pub struct MachineHost {
    dirs: MachineDirs,
    ports: PortAllocator,
    ssh: Arc<dyn SshRunner>,
    options: HostOptions,
}

impl MachineHost {
    pub fn new(dirs: MachineDirs, ssh: Arc<dyn SshRunner>, options: HostOptions) -> Self {
        let ports = PortAllocator::new(&dirs.global_data_dir);
        Self {
            dirs,
            ports,
            ssh,
            options,
        }
    }

    pub fn dirs(&self) -> &MachineDirs {
        &self.dirs
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Boots `mc`. The config is reloaded under the machine lock, so a
    /// concurrent start of the same machine waits and then sees it running.
    pub async fn start(
        &self,
        mc: &mut MachineConfig,
        provider: &dyn VmProvider,
    ) -> Result<StartReport, MachineError> {
        let _lock = MachineLock::acquire(&mc.lock_path()).await?;
        mc.refresh().await?;

        let _start_lock = if provider.require_exclusive_active() {
            let path = self.dirs.global_data_dir.join(START_LOCK_FILE);
            let lock = MachineLock::acquire(&path).await?;
            self.check_exclusive_active(mc, provider).await?;
            Some(lock)
        } else {
            None
        };

        let state = provider.state(mc, false).await?;
        if matches!(state, VmStatus::Running | VmStatus::Starting) {
            return Err(MachineError::AlreadyRunning(mc.name.clone()));
        }

        tracing::info!(machine = %mc.name, vm_type = %provider.vm_type(), "Starting machine");

        mc.starting = true;
        if let Err(e) = mc.write().await {
            tracing::error!("Failed to record starting state for {}: {}", mc.name, e);
        }

        let result = self.start_locked(mc, provider).await;

        mc.starting = false;
        if let Err(e) = mc.write().await {
            tracing::error!("Failed to clear starting state for {}: {}", mc.name, e);
        }

        if let Ok(report) = &result {
            tracing::info!(
                machine = %mc.name,
                ssh_port = mc.ssh.port,
                forwarding = %report.forwarding_state,
                "Machine started"
            );
        }
        result
    }

    async fn check_exclusive_active(
        &self,
        mc: &MachineConfig,
        provider: &dyn VmProvider,
    ) -> Result<(), MachineError> {
        for other in MachineConfig::list(&self.dirs).await? {
            if other.name == mc.name {
                continue;
            }
            let state = provider.state(&other, false).await?;
            if matches!(state, VmStatus::Running | VmStatus::Starting) {
                return Err(MachineError::ExclusiveActive {
                    machine: mc.name.clone(),
                    active: other.name,
                });
            }
        }
        Ok(())
    }

    async fn start_locked(
        &self,
        mc: &mut MachineConfig,
        provider: &dyn VmProvider,
    ) -> Result<StartReport, MachineError> {
        let report = self.start_networking(mc, provider).await?;

        let result = self.boot(mc, provider).await;
        if result.is_err()
            && !provider.use_provider_network_setup()
            && let Err(e) = cleanup_gvproxy(&self.dirs.gvproxy_pid_file()).await
        {
            tracing::error!("Failed to clean up forwarding process: {}", e);
        }

        result.map(|()| report)
    }

    async fn start_networking(
        &self,
        mc: &mut MachineConfig,
        provider: &dyn VmProvider,
    ) -> Result<StartReport, MachineError> {
        // Port 0 is left behind by a reassignment that did not finish.
        if mc.ssh.port == 0 || !is_locally_available(mc.ssh.port) {
            tracing::warn!(
                "Detected port conflict on machine ssh port [{}], reassigning",
                mc.ssh.port
            );
            self.reassign_ssh_port(mc, provider).await?;
        }

        if provider.use_provider_network_setup() {
            provider.start_networking(mc, None).await?;
            return Ok(StartReport {
                forward_socket: PathBuf::new(),
                forwarding_state: ForwardingState::NoForwarding,
            });
        }

        tokio::fs::create_dir_all(&self.dirs.runtime_dir).await?;

        let mut cmd = GvproxyCommand::new();
        cmd.ssh_port = mc.ssh.port;
        cmd.pid_file = Some(self.dirs.gvproxy_pid_file());
        if self.options.debug {
            cmd.debug = true;
            cmd.log_file = Some(self.dirs.gvproxy_log_file());
        }

        let (forward_socket, forwarding_state) =
            setup_api_forwarding(mc, &self.dirs, &self.options.forwarding, &mut cmd)?;

        provider.start_networking(mc, Some(&mut cmd)).await?;
        cmd.launch(&self.options.gvproxy_binary)?;

        Ok(StartReport {
            forward_socket,
            forwarding_state,
        })
    }

    /// Moves the machine to a freshly allocated SSH port.
    ///
    /// The config is written with port 0 first so an interrupted
    /// reassignment is repaired on the next start.
    async fn reassign_ssh_port(
        &self,
        mc: &mut MachineConfig,
        provider: &dyn VmProvider,
    ) -> Result<(), MachineError> {
        let ports = self.ports.clone();
        let new_port = tokio::task::spawn_blocking(move || ports.allocate()).await??;

        if let Err(e) = self.commit_ssh_port(mc, provider, new_port).await {
            let ports = self.ports.clone();
            match tokio::task::spawn_blocking(move || ports.release(new_port)).await {
                Ok(Ok(())) => {}
                Ok(Err(release_err)) => {
                    tracing::warn!("Failed to release port {}: {}", new_port, release_err)
                }
                Err(join_err) => {
                    tracing::warn!("Failed to release port {}: {}", new_port, join_err)
                }
            }
            return Err(e);
        }

        tracing::info!(machine = %mc.name, port = new_port, "Reassigned SSH port");
        Ok(())
    }

    async fn commit_ssh_port(
        &self,
        mc: &mut MachineConfig,
        provider: &dyn VmProvider,
        new_port: u16,
    ) -> Result<(), MachineError> {
        let old_port = mc.ssh.port;

        mc.ssh.port = 0;
        mc.write().await?;

        if old_port != 0 {
            let ports = self.ports.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || ports.release(old_port)).await? {
                tracing::warn!("Failed to release prior port {}: {}", old_port, e);
            }
        }

        provider.update_ssh_port(mc, new_port).await?;
        mc.ssh.port = new_port;

        let mut connections = Connections::load(&self.dirs.connections_file).await?;
        connections.update_pair_port(&mc.name, new_port);
        connections.save(&self.dirs.connections_file).await?;

        mc.write().await
    }

    async fn boot(&self, mc: &MachineConfig, provider: &dyn VmProvider) -> Result<(), MachineError> {
        let started = provider.start_vm(mc).await?;

        let Some(wait_for_ready) = started.wait_for_ready else {
            return Err(MachineError::Provider(
                "no valid wait function returned".to_string(),
            ));
        };
        wait_for_ready.await?;

        if let Some(release) = started.release
            && let Err(e) = release()
        {
            tracing::error!("Failed to release VM start process: {}", e);
        }

        provider.post_start_networking(mc, false).await?;

        let probe = MachineProbe {
            mc,
            provider,
            ssh: self.ssh.as_ref(),
            target: SshTarget::for_machine(mc),
            policy: self.options.readiness,
        };
        let outcome = conduct_readiness_check(&self.options.readiness, &probe).await?;
        if !outcome.connected {
            let reason = outcome
                .last_failure
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no readiness attempts were made".to_string());
            return Err(MachineError::ReadinessFailed(reason));
        }
        tracing::debug!(attempts = outcome.attempts, "Machine is reachable over SSH");

        provider.mount_volumes_to_vm(mc, false).await
    }

    /// Stops a running machine and its forwarder. Stopping a stopped
    /// machine succeeds without doing anything.
    pub async fn stop(
        &self,
        mc: &mut MachineConfig,
        provider: &dyn VmProvider,
        hard: bool,
    ) -> Result<(), MachineError> {
        let _lock = MachineLock::acquire(&mc.lock_path()).await?;
        mc.refresh().await?;

        let state = provider.state(mc, false).await?;
        if state == VmStatus::Stopped {
            return Ok(());
        }
        if state != VmStatus::Running {
            return Err(MachineError::WrongState {
                expected: VmStatus::Running.to_string(),
                actual: state.to_string(),
            });
        }

        provider.stop_vm(mc, hard).await?;

        match tokio::fs::remove_file(mc.ready_socket(&self.dirs)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if !provider.use_provider_network_setup()
            && let Err(e) = cleanup_gvproxy(&self.dirs.gvproxy_pid_file()).await
        {
            tracing::error!("Unable to clean up forwarding process: {}", e);
        }

        mc.mark_up();
        mc.write().await?;

        tracing::info!(machine = %mc.name, hard, "Machine stopped");
        Ok(())
    }
}

struct MachineProbe<'a> {
    mc: &'a MachineConfig,
    provider: &'a dyn VmProvider,
    ssh: &'a dyn SshRunner,
    target: SshTarget,
    policy: ReadinessPolicy,
}

#[async_trait]
impl ReadinessProbe for MachineProbe<'_> {
    async fn vm_status(&self) -> Result<VmStatus, MachineError> {
        self.provider.state(self.mc, true).await
    }

    fn ssh_port(&self) -> u16 {
        self.target.port
    }

    async fn ssh_listening(&self) -> bool {
        let connect = TcpStream::connect(("127.0.0.1", self.target.port));
        matches!(
            tokio::time::timeout(self.policy.connect_timeout, connect).await,
            Ok(Ok(_))
        )
    }

    async fn ssh_noop(&self) -> Result<(), MachineError> {
        self.ssh.run(&self.target, &["true"], true).await
    }
}
