use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("wrong manifest type for disk artifact {reference}: {media_type}")]
    NotManifestList {
        reference: String,
        media_type: String,
    },

    #[error("no valid disk artifact found for {arch}/{os}/{disk_type}")]
    NoMatchingArtifact {
        arch: String,
        os: String,
        disk_type: String,
    },

    #[error("invalid disk image {digest}: expected exactly one layer, found {count}")]
    LayerCount { digest: String, count: usize },

    #[error("disk artifact {digest} is missing the {annotation} annotation")]
    MissingAnnotation { digest: String, annotation: String },

    #[error("unsupported host architecture: {0}")]
    UnsupportedArch(String),

    #[error("disk image not found: {0}")]
    NotFound(String),

    #[error("download of {url} failed: {status}")]
    Download { url: String, status: String },

    #[error("registry error: {0}")]
    Registry(#[from] berth_remote::RegistryError),

    #[error("layout error: {0}")]
    Layout(#[from] berth_store::LayoutError),

    #[error("decompression error: {0}")]
    Compress(#[from] berth_compress::CompressError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
