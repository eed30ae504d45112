use crate::error::MachineError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a file, shared across processes. Released
/// when dropped.
pub struct MachineLock {
    file: File,
    path: PathBuf,
}

impl MachineLock {
    /// Blocks on a worker thread until the lock at `path` is ours.
    pub async fn acquire(path: &Path) -> Result<Self, MachineError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path)).await?
    }

    fn acquire_blocking(path: PathBuf) -> Result<Self, MachineError> {
        let lock_err = |source| MachineError::Lock {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;

        tracing::trace!(path = ?path, "Acquired lock");
        Ok(Self { file, path })
    }
}

impl Drop for MachineLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lock_creates_parent() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("nested/dev.lck");

        let lock = MachineLock::acquire(&path).await.unwrap();
        assert!(path.exists());
        drop(lock);

        // Reacquirable once released.
        MachineLock::acquire(&path).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_holder_waits_for_release() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("dev.lck");
        let released = Arc::new(AtomicBool::new(false));

        let first = MachineLock::acquire(&path).await.unwrap();
        let waiter = {
            let path = path.clone();
            let released = released.clone();
            tokio::spawn(async move {
                let _second = MachineLock::acquire(&path).await.unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        released.store(true, Ordering::SeqCst);
        drop(first);

        assert!(waiter.await.unwrap());
    }
}
