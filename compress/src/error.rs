use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("invalid machine image {path}: {reason}")]
    InvalidImage { path: String, reason: String },

    #[error("decompressor for {0} used before it was opened")]
    NotOpen(String),

    #[error("{program} exited with {status}")]
    Command { program: String, status: String },

    #[error("decompression worker failed: {0}")]
    Worker(String),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
