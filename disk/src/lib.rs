//! Materializes a machine's boot disk from an OCI registry artifact, an
//! HTTP URL or a local file.

mod artifact;
mod disker;
mod error;
mod source;

pub use artifact::{
    DiskArtifactKey, MACHINE_OS_VERSION, OciArtifactDisk, default_image_reference,
    extract_kind_and_compression, host_arch,
};
pub use disker::{DiskSource, Disker, LocalDisk, UrlDisk, final_disk_path, get_disk};
pub use error::DiskError;
pub use source::{ArtifactSource, RegistrySource};
