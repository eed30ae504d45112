use crate::error::MachineError;
use crate::provider::VmStatus;
use async_trait::async_trait;
use std::time::Duration;

/// Backoff for the readiness poll. The delay doubles after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub initial_backoff: Duration,
    pub max_attempts: usize,
    pub connect_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_attempts: 6,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessFailure {
    NotRunning(VmStatus),
    SshNotListening(u16),
    Ssh(String),
}

impl std::fmt::Display for ReadinessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessFailure::NotRunning(status) => {
                write!(f, "machine not running (state {})", status)
            }
            ReadinessFailure::SshNotListening(port) => {
                write!(f, "machine is not listening on ssh port {}", port)
            }
            ReadinessFailure::Ssh(e) => write!(f, "ssh error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessOutcome {
    pub connected: bool,
    pub attempts: usize,
    pub last_failure: Option<ReadinessFailure>,
}

/// The three checks, cheapest first.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn vm_status(&self) -> Result<VmStatus, MachineError>;

    /// The port checked by `ssh_listening`, for error reporting.
    fn ssh_port(&self) -> u16;

    async fn ssh_listening(&self) -> bool;

    async fn ssh_noop(&self) -> Result<(), MachineError>;
}

/// Polls until all three checks pass in one attempt or attempts run out.
///
/// Check failures are retried. A failure to query the VM state is not.
pub async fn conduct_readiness_check(
    policy: &ReadinessPolicy,
    probe: &dyn ReadinessProbe,
) -> Result<ReadinessOutcome, MachineError> {
    let mut backoff = policy.initial_backoff;
    let mut last_failure = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        let status = probe.vm_status().await?;
        if status != VmStatus::Running {
            last_failure = Some(ReadinessFailure::NotRunning(status));
            continue;
        }

        if !probe.ssh_listening().await {
            last_failure = Some(ReadinessFailure::SshNotListening(probe.ssh_port()));
            continue;
        }

        if let Err(e) = probe.ssh_noop().await {
            tracing::debug!("SSH readiness check failed: {}", e);
            last_failure = Some(ReadinessFailure::Ssh(e.to_string()));
            continue;
        }

        return Ok(ReadinessOutcome {
            connected: true,
            attempts: attempt + 1,
            last_failure,
        });
    }

    Ok(ReadinessOutcome {
        connected: false,
        attempts: policy.max_attempts,
        last_failure,
    })
}
