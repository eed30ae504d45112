use thiserror::Error;

#[derive(Error, Debug)]
pub enum MachineError {
    #[error("invalid machine state: expected {expected}, got {actual}")]
    WrongState { expected: String, actual: String },

    #[error("unable to start {0:?}: already running")]
    AlreadyRunning(String),

    #[error("unable to start {machine:?}: machine {active:?} is already active")]
    ExclusiveActive { machine: String, active: String },

    #[error("failed to acquire lock {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("machine {0:?} does not exist")]
    NotFound(String),

    #[error("machine did not transition into running state: {0}")]
    ReadinessFailed(String),

    #[error("ssh error: {0}")]
    Ssh(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("forwarding process error: {0}")]
    Forwarder(String),

    #[error("unknown vm type: {0}")]
    UnknownVmType(String),

    #[error("port error: {0}")]
    Ports(#[from] berth_ports::PortError),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("system error: {0}")]
    System(#[from] nix::errno::Errno),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
