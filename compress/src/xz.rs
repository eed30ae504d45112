use crate::decompressor::{Decompressor, Source};
use crate::error::CompressError;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

/// Prefers a native `xz` from the search path and falls back to liblzma.
///
/// Both paths run the decoder and the output copy on separate threads
/// joined by a pipe.
pub(crate) struct XzDecompressor {
    source: Source,
    binary: Option<PathBuf>,
}

impl XzDecompressor {
    pub(crate) fn new(source: Source) -> Self {
        Self {
            source,
            binary: None,
        }
    }
}

impl Decompressor for XzDecompressor {
    fn open(&mut self) -> Result<(), CompressError> {
        self.binary = which::which("xz").ok();
        self.source.open()
    }

    fn decompress(&mut self, w: &mut (dyn Write + Send)) -> Result<u64, CompressError> {
        let source = self.source.take()?;
        match &self.binary {
            Some(binary) => decompress_with_binary(binary, source, w),
            None => {
                tracing::debug!("xz not found on PATH, using in-process decoder");
                decompress_in_process(source, w)
            }
        }
    }

    fn close(&mut self) {
        self.binary = None;
        self.source.close();
    }
}

fn join_worker(
    handle: thread::ScopedJoinHandle<'_, io::Result<u64>>,
) -> Result<u64, CompressError> {
    handle
        .join()
        .map_err(|_| CompressError::Worker("xz worker thread panicked".to_string()))?
        .map_err(CompressError::from)
}

pub(crate) fn decompress_with_binary(
    binary: &Path,
    mut source: File,
    w: &mut (dyn Write + Send),
) -> Result<u64, CompressError> {
    tracing::debug!("Decompressing with {:?}", binary);

    let mut child = Command::new(binary)
        .args(["-d", "-c"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;

    let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(CompressError::Worker("xz pipes unavailable".to_string()));
    };

    let (fed, copied) = thread::scope(|s| {
        let feeder = s.spawn(move || {
            let fed = io::copy(&mut source, &mut stdin);
            drop(stdin);
            fed
        });

        let copied = io::copy(&mut stdout, w);
        if copied.is_err() {
            // Unblocks the feeder if it is stuck writing into a full pipe.
            let _ = child.kill();
        }
        drop(stdout);

        (join_worker(feeder), copied)
    });

    let status = child.wait()?;
    let copied = copied?;
    fed?;

    if !status.success() {
        return Err(CompressError::Command {
            program: binary.display().to_string(),
            status: status.to_string(),
        });
    }

    Ok(copied)
}

pub(crate) fn decompress_in_process(
    source: File,
    w: &mut (dyn Write + Send),
) -> Result<u64, CompressError> {
    let (mut reader, writer) = os_pipe::pipe()?;

    let (decoded, copied) = thread::scope(|s| {
        let producer = s.spawn(move || {
            let mut decoder = xz2::read::XzDecoder::new_multi_decoder(source);
            let mut writer = writer;
            io::copy(&mut decoder, &mut writer)
        });

        let copied = io::copy(&mut reader, w);
        drop(reader);

        (join_worker(producer), copied)
    });

    let copied = copied?;
    let decoded = decoded?;
    if decoded != copied {
        return Err(CompressError::Worker(format!(
            "decoded {} bytes but wrote {}",
            decoded, copied
        )));
    }

    Ok(copied)
}
