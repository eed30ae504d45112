use std::fs::{self, File};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

/// Zero runs shorter than this are written out; longer ones become holes.
pub const ZEROS_THRESHOLD: u64 = 1024;

static ZEROS: [u8; ZEROS_THRESHOLD as usize] = [0; ZEROS_THRESHOLD as usize];

/// A writer that seeks over long runs of zero bytes instead of writing them.
///
/// Zeros are held back until the next non-zero byte (or [`finish`]) decides
/// whether they are cheap enough to write literally. Reading the result back
/// yields exactly the bytes that were written.
///
/// [`finish`]: SparseWriter::finish
pub struct SparseWriter<W: Write + Seek> {
    inner: W,
    pending_zeros: u64,
}

impl<W: Write + Seek> SparseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending_zeros: 0,
        }
    }

    fn flush_zeros(&mut self) -> io::Result<()> {
        let zeros = std::mem::take(&mut self.pending_zeros);
        if zeros >= ZEROS_THRESHOLD {
            self.inner.seek(SeekFrom::Current(zeros as i64))?;
        } else if zeros > 0 {
            self.inner.write_all(&ZEROS[..zeros as usize])?;
        }
        Ok(())
    }

    /// Settles any trailing zero run and returns the inner writer.
    ///
    /// A trailing hole is followed by one explicit zero byte so the file
    /// length covers it.
    pub fn finish(mut self) -> io::Result<W> {
        let zeros = std::mem::take(&mut self.pending_zeros);
        if zeros >= ZEROS_THRESHOLD {
            self.inner.seek(SeekFrom::Current(zeros as i64 - 1))?;
            self.inner.write_all(&[0])?;
        } else if zeros > 0 {
            self.inner.write_all(&ZEROS[..zeros as usize])?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for SparseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pos = 0;
        while pos < buf.len() {
            let data_start = buf[pos..]
                .iter()
                .position(|&b| b != 0)
                .map_or(buf.len(), |n| pos + n);
            self.pending_zeros += (data_start - pos) as u64;
            if data_start == buf.len() {
                break;
            }

            let data_end = buf[data_start..]
                .iter()
                .position(|&b| b == 0)
                .map_or(buf.len(), |n| data_start + n);

            self.flush_zeros()?;
            self.inner.write_all(&buf[data_start..data_end])?;
            pos = data_end;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copies `src` to `dst`, turning long zero runs into holes. The source's
/// permission bits are carried over.
pub fn copy_sparse(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(1 << 20, File::open(src)?);
    let mut writer = SparseWriter::new(File::create(dst)?);

    let copied = io::copy(&mut reader, &mut writer)?;
    let file = writer.finish()?;
    file.sync_all()?;

    fs::set_permissions(dst, fs::metadata(src)?.permissions())?;
    tracing::debug!("Sparse-copied {} bytes from {:?} to {:?}", copied, src, dst);
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn sparse_round_trip(input: &[u8], chunk: usize) -> Vec<u8> {
        let mut writer = SparseWriter::new(Cursor::new(Vec::new()));
        for part in input.chunks(chunk) {
            writer.write_all(part).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 | 1).collect()
    }

    fn assert_round_trips(input: &[u8]) {
        for chunk in [1, 7, 512, 1023, 1024, 1025, 4096, 1 << 20] {
            assert_eq!(
                sparse_round_trip(input, chunk),
                input,
                "mismatch for len {} chunk {}",
                input.len(),
                chunk
            );
        }
    }

    #[test]
    fn test_empty_input() {
        assert_round_trips(&[]);
    }

    #[test]
    fn test_single_bytes() {
        assert_round_trips(&[0]);
        assert_round_trips(&[7]);
    }

    #[test]
    fn test_all_zeros() {
        assert_round_trips(&vec![0; 10]);
        assert_round_trips(&vec![0; ZEROS_THRESHOLD as usize - 1]);
        assert_round_trips(&vec![0; ZEROS_THRESHOLD as usize]);
        assert_round_trips(&vec![0; 3 * 1024 * 1024]);
    }

    #[test]
    fn test_no_zeros() {
        assert_round_trips(&patterned(100_000));
    }

    #[test]
    fn test_zero_runs_at_edges_and_middle() {
        let mut input = vec![0; 5000];
        input.extend(patterned(3000));
        input.extend(vec![0; 1500]);
        input.extend(patterned(10));
        input.extend(vec![0; 300]);
        input.extend(patterned(2000));
        input.extend(vec![0; 4096]);
        assert_round_trips(&input);
    }

    #[test]
    fn test_megabyte_scale_mixed() {
        let mut input = Vec::with_capacity(4 << 20);
        for block in 0..64 {
            if block % 3 == 0 {
                input.extend(vec![0u8; 65536]);
            } else {
                input.extend(patterned(65536 - block));
                input.extend(vec![0u8; block * 17]);
            }
        }
        assert_round_trips(&input);
    }

    #[test]
    fn test_short_zero_runs_written_literally() {
        let mut writer = SparseWriter::new(Cursor::new(Vec::new()));
        writer.write_all(&[1, 0, 0, 0, 2]).unwrap();
        assert_eq!(writer.pending_zeros, 0);
        writer.write_all(&[0, 0]).unwrap();
        assert_eq!(writer.pending_zeros, 2);
        assert_eq!(writer.finish().unwrap().into_inner(), vec![1, 0, 0, 0, 2, 0, 0]);
    }

    #[test]
    fn test_file_length_with_trailing_hole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.raw");

        let mut input = patterned(100);
        input.extend(vec![0; 1 << 20]);

        let mut writer = SparseWriter::new(File::create(&path).unwrap());
        writer.write_all(&input).unwrap();
        writer.finish().unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), input.len() as u64);
        assert_eq!(fs::read(&path).unwrap(), input);
    }

    #[test]
    fn test_copy_sparse() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");

        let mut input = vec![0; 70_000];
        input.extend(patterned(5000));
        input.extend(vec![0; 70_000]);
        fs::write(&src, &input).unwrap();

        let copied = copy_sparse(&src, &dst).unwrap();
        assert_eq!(copied, input.len() as u64);
        assert_eq!(fs::read(&dst).unwrap(), input);
    }
}
