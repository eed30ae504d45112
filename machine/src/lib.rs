//! Machine lifecycle on the host side: configuration, forwarding process,
//! readiness polling and the start / stop state machine.

mod config;
mod connection;
mod error;
mod forwarding;
mod gvproxy;
mod host;
mod lock;
mod paths;
mod provider;
mod readiness;
mod ssh;

pub use config::{HostUser, MachineConfig, Mount, SshConfig, VmType};
pub use connection::{Connection, Connections};
pub use error::MachineError;
pub use forwarding::{ForwardingOptions, ForwardingState, guest_socket};
pub use gvproxy::{GvproxyCommand, cleanup_gvproxy};
pub use host::{HostOptions, MachineHost, StartReport};
pub use lock::MachineLock;
pub use paths::MachineDirs;
pub use provider::{ReadyFuture, ReleaseFn, StartedVm, VmProvider, VmStatus};
pub use readiness::{
    ReadinessFailure, ReadinessOutcome, ReadinessPolicy, ReadinessProbe, conduct_readiness_check,
};
pub use ssh::{OpenSsh, SshRunner, SshTarget};
