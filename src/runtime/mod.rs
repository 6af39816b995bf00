//! Runtime abstraction for system operations.
//!
//! Everything that touches the file system or the process environment goes
//! through [`Runtime`], so the workspace and installer logic can be tested
//! against `MockRuntime` as well as a temporary directory.
//!
//! # Structure
//!
//! - `path` - Path utility functions (normalize, is_path_under, relative paths)
//! - `env` - Well-known directories and the running executable
//! - `fs` - File system operations (read, write, directory, permissions)
//! - `lock` - Exclusive advisory file locks, blocking or polled from async code

mod env;
mod fs;
mod lock;
pub mod path;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub use lock::{FileLock, LOCK_POLL_INTERVAL, lock_exclusive_async};
pub use path::is_path_under;

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // File System
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Canonicalize a path by resolving all symlinks and returning the canonical absolute path.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    fn create_file(&self, path: &Path) -> Result<Box<dyn std::io::Write + Send>>;
    fn open(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send>>;

    /// Set file permissions (mode) on Unix systems. No-op on Windows.
    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()>;

    /// Block until an exclusive lock on `path` is held. The file is created if missing.
    /// The lock is released when the returned guard is dropped.
    fn lock_exclusive(&self, path: &Path) -> Result<FileLock>;

    /// Like [`Runtime::lock_exclusive`] but returns `None` instead of waiting.
    fn try_lock_exclusive(&self, path: &Path) -> Result<Option<FileLock>>;

    // Directories
    fn current_exe(&self) -> Result<PathBuf>;
    fn config_dir(&self) -> Option<PathBuf>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.write_impl(path, contents)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.read_to_string_impl(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.rename_impl(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.create_dir_all_impl(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.remove_file_impl(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.remove_dir_all_impl(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.exists_impl(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.is_dir_impl(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.read_dir_impl(path)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        self.canonicalize_impl(path)
    }

    fn create_file(&self, path: &Path) -> Result<Box<dyn std::io::Write + Send>> {
        self.create_file_impl(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send>> {
        self.open_impl(path)
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        self.set_permissions_impl(path, mode)
    }

    fn lock_exclusive(&self, path: &Path) -> Result<FileLock> {
        FileLock::acquire(path)
    }

    fn try_lock_exclusive(&self, path: &Path) -> Result<Option<FileLock>> {
        FileLock::try_acquire(path)
    }

    fn current_exe(&self) -> Result<PathBuf> {
        self.current_exe_impl()
    }

    fn config_dir(&self) -> Option<PathBuf> {
        self.config_dir_impl()
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A sibling path of `path` that no other writer in any process will pick.
pub fn unique_sibling(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        ".{}.{}.{}.{}",
        file_name,
        std::process::id(),
        n,
        suffix
    ))
}

/// Replace `path` with `contents` so readers see either the old or the new file, never a mix.
pub fn write_atomic<R: Runtime + ?Sized>(runtime: &R, path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = unique_sibling(path, "tmp");
    runtime
        .write(&tmp, contents)
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    if let Err(e) = runtime.rename(&tmp, path) {
        let _ = runtime.remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace {:?}", path));
    }
    Ok(())
}
