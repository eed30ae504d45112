use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("failed to acquire port reservation lock {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no free port found after {0} attempts")]
    RetriesExceeded(usize),

    #[error("failed to persist port reservations to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
