use crate::config::{MachineConfig, VmType};
use crate::error::MachineError;
use crate::gvproxy::GvproxyCommand;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Starting,
    Stopped,
    Unknown,
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmStatus::Running => write!(f, "running"),
            VmStatus::Starting => write!(f, "starting"),
            VmStatus::Stopped => write!(f, "stopped"),
            VmStatus::Unknown => write!(f, "unknown"),
        }
    }
}

pub type ReadyFuture = Pin<Box<dyn Future<Output = Result<(), MachineError>> + Send>>;

pub type ReleaseFn = Box<dyn FnOnce() -> Result<(), MachineError> + Send>;

/// What a provider hands back after booting a VM.
pub struct StartedVm {
    /// Resolves once the guest signalled it booted. Required.
    pub wait_for_ready: Option<ReadyFuture>,
    /// Lets go of the booting process once the guest is ready.
    pub release: Option<ReleaseFn>,
}

/// A hypervisor backend.
#[async_trait]
pub trait VmProvider: Send + Sync {
    fn vm_type(&self) -> VmType;

    async fn state(&self, mc: &MachineConfig, bypass_cache: bool)
    -> Result<VmStatus, MachineError>;

    async fn start_vm(&self, mc: &MachineConfig) -> Result<StartedVm, MachineError>;

    async fn stop_vm(&self, mc: &MachineConfig, hard: bool) -> Result<(), MachineError>;

    /// Adds provider-specific rules to the forwarder. `cmd` is `None` when
    /// the provider does its own networking.
    async fn start_networking(
        &self,
        mc: &MachineConfig,
        cmd: Option<&mut GvproxyCommand>,
    ) -> Result<(), MachineError>;

    async fn post_start_networking(
        &self,
        _mc: &MachineConfig,
        _no_info: bool,
    ) -> Result<(), MachineError> {
        Ok(())
    }

    fn use_provider_network_setup(&self) -> bool;

    /// Whether only one machine of this type may run at a time.
    fn require_exclusive_active(&self) -> bool {
        false
    }

    async fn update_ssh_port(&self, mc: &MachineConfig, port: u16) -> Result<(), MachineError>;

    async fn mount_volumes_to_vm(&self, mc: &MachineConfig, quiet: bool)
    -> Result<(), MachineError>;
}
