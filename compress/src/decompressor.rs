use crate::error::CompressError;
use crate::format::ImageCompression;
use crate::sparse::SparseWriter;
use crate::xz::XzDecompressor;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// One decompression algorithm: open the source, stream it into a writer, close.
pub trait Decompressor: Send {
    fn open(&mut self) -> Result<(), CompressError>;

    fn decompress(&mut self, w: &mut (dyn Write + Send)) -> Result<u64, CompressError>;

    fn close(&mut self);
}

pub fn new_decompressor(format: ImageCompression, path: &Path) -> Box<dyn Decompressor> {
    let source = Source::new(path);
    match format {
        ImageCompression::Xz => Box::new(XzDecompressor::new(source)),
        ImageCompression::Zip => Box::new(ZipDecompressor {
            path: path.to_path_buf(),
            archive: None,
        }),
        ImageCompression::Gzip => Box::new(StreamDecompressor::new(source, gzip_reader)),
        ImageCompression::Bzip2 => Box::new(StreamDecompressor::new(source, bzip2_reader)),
        ImageCompression::Zstd => Box::new(StreamDecompressor::new(source, zstd_reader)),
        ImageCompression::Uncompressed => {
            Box::new(StreamDecompressor::new(source, passthrough_reader))
        }
    }
}

/// Decompresses `src` into `dst`, detecting the format from `src`'s content.
///
/// The output is written sparsely and gets the permission bits of `src`.
pub fn decompress(src: &Path, dst: &Path) -> Result<(), CompressError> {
    let format = ImageCompression::sniff(src)?;
    tracing::info!(src = ?src, dst = ?dst, format = %format, "Decompressing machine image");

    let mut decompressor = new_decompressor(format, src);
    decompressor.open()?;
    let result = write_sparse(decompressor.as_mut(), dst);
    decompressor.close();

    let written = result?;
    fs::set_permissions(dst, fs::metadata(src)?.permissions())?;

    tracing::debug!("Wrote {} decompressed bytes to {:?}", written, dst);
    Ok(())
}

fn write_sparse(decompressor: &mut dyn Decompressor, dst: &Path) -> Result<u64, CompressError> {
    let mut writer = SparseWriter::new(File::create(dst)?);
    let written = decompressor.decompress(&mut writer)?;
    let file = writer.finish()?;
    file.sync_all()?;
    Ok(written)
}

/// The compressed input file, held between `open` and `decompress`.
pub(crate) struct Source {
    path: PathBuf,
    file: Option<File>,
}

impl Source {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
        }
    }

    pub(crate) fn open(&mut self) -> Result<(), CompressError> {
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    pub(crate) fn take(&mut self) -> Result<File, CompressError> {
        self.file
            .take()
            .ok_or_else(|| CompressError::NotOpen(self.path.display().to_string()))
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
    }
}

type ReaderFactory = fn(File) -> io::Result<Box<dyn Read + Send>>;

fn gzip_reader(file: File) -> io::Result<Box<dyn Read + Send>> {
    Ok(Box::new(flate2::read::MultiGzDecoder::new(file)))
}

fn bzip2_reader(file: File) -> io::Result<Box<dyn Read + Send>> {
    Ok(Box::new(bzip2::read::MultiBzDecoder::new(file)))
}

fn zstd_reader(file: File) -> io::Result<Box<dyn Read + Send>> {
    Ok(Box::new(zstd::stream::read::Decoder::new(file)?))
}

fn passthrough_reader(file: File) -> io::Result<Box<dyn Read + Send>> {
    Ok(Box::new(file))
}

/// Any format that is a plain `Read` adapter over the source file.
struct StreamDecompressor {
    source: Source,
    reader: ReaderFactory,
}

impl StreamDecompressor {
    fn new(source: Source, reader: ReaderFactory) -> Self {
        Self { source, reader }
    }
}

impl Decompressor for StreamDecompressor {
    fn open(&mut self) -> Result<(), CompressError> {
        self.source.open()
    }

    fn decompress(&mut self, w: &mut (dyn Write + Send)) -> Result<u64, CompressError> {
        let mut reader = (self.reader)(self.source.take()?)?;
        Ok(io::copy(&mut reader, w)?)
    }

    fn close(&mut self) {
        self.source.close();
    }
}

/// Zip archives must hold exactly one file, the disk image.
struct ZipDecompressor {
    path: PathBuf,
    archive: Option<ZipArchive<File>>,
}

impl Decompressor for ZipDecompressor {
    fn open(&mut self) -> Result<(), CompressError> {
        let archive = ZipArchive::new(File::open(&self.path)?)?;
        if archive.len() != 1 {
            return Err(CompressError::InvalidImage {
                path: self.path.display().to_string(),
                reason: format!(
                    "zip archive must contain exactly one file, found {}",
                    archive.len()
                ),
            });
        }
        self.archive = Some(archive);
        Ok(())
    }

    fn decompress(&mut self, w: &mut (dyn Write + Send)) -> Result<u64, CompressError> {
        let archive = self
            .archive
            .as_mut()
            .ok_or_else(|| CompressError::NotOpen(self.path.display().to_string()))?;
        let mut entry = archive.by_index(0)?;
        tracing::debug!("Extracting {} from {:?}", entry.name(), self.path);
        Ok(io::copy(&mut entry, w)?)
    }

    fn close(&mut self) {
        self.archive = None;
    }
}
