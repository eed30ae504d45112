use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const MAGIC_LEN: usize = 8;

const XZ_MAGIC: &[u8] = &[0xFD, b'7', b'z', b'X', b'Z', 0x00];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B, 0x08];
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCompression {
    Xz,
    Zip,
    Gzip,
    Bzip2,
    Zstd,
    Uncompressed,
}

impl ImageCompression {
    /// Picks a format from the leading bytes of a file.
    ///
    /// Zip payloads need not start with a recognizable header, so a `.zip`
    /// suffix is only consulted when no other magic matched.
    pub fn detect(magic: &[u8], path: &Path) -> Self {
        if magic.starts_with(XZ_MAGIC) {
            ImageCompression::Xz
        } else if magic.starts_with(ZSTD_MAGIC) {
            ImageCompression::Zstd
        } else if magic.starts_with(GZIP_MAGIC) {
            ImageCompression::Gzip
        } else if magic.starts_with(BZIP2_MAGIC) {
            ImageCompression::Bzip2
        } else if has_zip_suffix(path) {
            ImageCompression::Zip
        } else {
            ImageCompression::Uncompressed
        }
    }

    pub fn sniff(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = Vec::with_capacity(MAGIC_LEN);
        file.by_ref().take(MAGIC_LEN as u64).read_to_end(&mut magic)?;
        Ok(Self::detect(&magic, path))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageCompression::Xz => "xz",
            ImageCompression::Zip => "zip",
            ImageCompression::Gzip => "gz",
            ImageCompression::Bzip2 => "bz2",
            ImageCompression::Zstd => "zst",
            ImageCompression::Uncompressed => "",
        }
    }
}

impl fmt::Display for ImageCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageCompression::Uncompressed => write!(f, "uncompressed"),
            other => write!(f, "{}", other.extension()),
        }
    }
}

fn has_zip_suffix(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}
