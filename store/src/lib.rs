mod digest;
mod error;
mod layout;

pub use digest::Digest;
pub use error::LayoutError;
pub use layout::{BlobWriter, OciLayout};
