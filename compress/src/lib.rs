//! Turns a compressed VM disk image into a plain, sparse local file.

mod decompressor;
mod error;
mod format;
mod sparse;
mod xz;

pub use decompressor::{Decompressor, decompress, new_decompressor};
pub use error::CompressError;
pub use format::ImageCompression;
pub use sparse::{SparseWriter, ZEROS_THRESHOLD, copy_sparse};
