use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("manifest not found in layout {0}")]
    ManifestNotFound(String),

    #[error("layout {path} lists {count} manifests, expected exactly one")]
    ManifestCount { path: String, count: usize },

    #[error("manifest {digest} has {count} layers, disk artifacts must have exactly 1")]
    LayerCount { digest: String, count: usize },

    #[error("not an OCI layout: {0}")]
    NotALayout(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("invalid digest format: {0}")]
    InvalidDigest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
