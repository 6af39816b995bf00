//! Scoped removal of temporary paths.
//!
//! Staging directories and half-downloaded files are owned by a
//! [`CleanupGuard`]. Whatever path the guard holds is removed when it goes out
//! of scope, whether the operation returned an error or was cancelled
//! mid-flight. Successful installs rename the staged content away first.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::module::ModuleKey;
use crate::runtime::Runtime;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// RAII guard that removes a file or directory on drop.
pub struct CleanupGuard<'r, R: Runtime + ?Sized> {
    runtime: &'r R,
    path: PathBuf,
}

impl<'r, R: Runtime + ?Sized> CleanupGuard<'r, R> {
    /// Guard an existing or future path.
    pub fn new(runtime: &'r R, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    /// Create a fresh staging directory for `key` under `staging_root`.
    /// The name is unique per process and call, so concurrent stagings never collide.
    pub fn staging_dir(runtime: &'r R, staging_root: &Path, key: &ModuleKey) -> Result<Self> {
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = staging_root.join(format!("{}.{}.{}", key, std::process::id(), n));
        runtime
            .create_dir_all(&path)
            .with_context(|| format!("Failed to create staging directory {:?}", path))?;
        debug!("Staging {} in {:?}", key, path);
        Ok(Self::new(runtime, path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Runtime + ?Sized> Drop for CleanupGuard<'_, R> {
    fn drop(&mut self) {
        if !self.runtime.exists(&self.path) {
            return;
        }
        debug!("Cleaning up: {:?}", self.path);
        let result = if self.runtime.is_dir(&self.path) {
            self.runtime.remove_dir_all(&self.path)
        } else {
            self.runtime.remove_file(&self.path)
        };
        if let Err(e) = result {
            warn!("Failed to clean up {:?}: {:#}", self.path, e);
        }
    }
}
