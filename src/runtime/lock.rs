use anyhow::{Context, Result};
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::Runtime;
use crate::error::ModError;

/// How long an async waiter sleeps between attempts on a held lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Holds an exclusive advisory lock until dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file {:?}", path))
}

impl FileLock {
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_exclusive(&file).with_context(|| format!("Failed to lock {:?}", path))?;
        debug!("Acquired lock {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// `None` when someone else holds the lock, including another handle in this process.
    pub(crate) fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("Acquired lock {:?}", path);
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to lock {:?}", path)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released lock {:?}", self.path);
    }
}

/// Wait for an exclusive lock on `path` without blocking the executor thread.
pub async fn lock_exclusive_async<R: Runtime + ?Sized>(
    runtime: &R,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<FileLock> {
    let mut waited = false;
    loop {
        if let Some(lock) = runtime.try_lock_exclusive(path)? {
            return Ok(lock);
        }
        if !waited {
            debug!("{:?} is held elsewhere, waiting", path);
            waited = true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(ModError::Cancelled.into()),
            _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
        }
    }
}
