//! The workspace handle.
//!
//! A workspace is a directory holding a `.modman` state directory:
//!
//! ```text
//! <root>/.modman/index.json     installed modules
//! <root>/.modman/index.lock     single-writer lock for the index
//! <root>/.modman/catalog.json   cached catalog
//! <root>/.modman/config.json    workspace settings
//! <root>/.modman/staging/       in-flight installs
//! <root>/.modman/locks/          one lock per module being installed
//! <root>/<modules_dir>/<name>-<version>/
//! ```
//!
//! All reads load the index fresh from disk. All writes go through
//! [`Workspace::with_write_lock`] (or its async twin), which holds an
//! in-process mutex and an OS file lock only for the load-modify-persist span.

mod config;
mod index;
pub mod scan;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, TryLockError};
use tokio_util::sync::CancellationToken;

pub use config::{DEFAULT_MODULES_DIR, WorkspaceConfig};
pub use index::Index;

use crate::error::{ModError, kind_of};
use crate::module::ModuleKey;
use crate::runtime::{LOCK_POLL_INTERVAL, Runtime};

pub const STATE_DIR: &str = ".modman";
pub const INDEX_FILE: &str = "index.json";
pub const LOCK_FILE: &str = "index.lock";
pub const CATALOG_CACHE_FILE: &str = "catalog.json";
pub const CONFIG_FILE: &str = "config.json";
pub const STAGING_DIR: &str = "staging";
pub const LOCKS_DIR: &str = "locks";

/// Walk up from `start` to the nearest directory holding a workspace index.
pub fn find_root_from<R: Runtime + ?Sized>(runtime: &R, start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| runtime.exists(&dir.join(STATE_DIR).join(INDEX_FILE)))
        .map(Path::to_path_buf)
}

pub struct Workspace<R: Runtime> {
    runtime: R,
    root: PathBuf,
    config: WorkspaceConfig,
    writer: Mutex<()>,
}

impl<R: Runtime> Workspace<R> {
    /// Create a new workspace at `path`. Refuses to nest inside an existing one.
    #[tracing::instrument(skip(runtime, config))]
    pub fn init(runtime: R, path: &Path, config: WorkspaceConfig) -> Result<Self> {
        runtime
            .create_dir_all(path)
            .map_err(|e| ModError::io("create workspace directory", path, e))?;
        let root = runtime.canonicalize(path)?;

        if let Some(existing) = find_root_from(&runtime, &root) {
            return Err(ModError::AlreadyInitialized {
                path: root,
                root: existing,
            }
            .into());
        }

        let workspace = Self::with_root(runtime, root, config);
        let state_dir = workspace.state_dir();
        workspace
            .runtime
            .create_dir_all(&state_dir)
            .map_err(|e| ModError::io("create", &state_dir, e))?;
        workspace
            .config
            .save(&workspace.runtime, &workspace.config_path())?;
        Index::new().persist(
            &workspace.runtime,
            &workspace.root,
            &workspace.index_path(),
        )?;

        info!("Initialized workspace at {:?}", workspace.root);
        Ok(workspace)
    }

    /// Open the workspace containing `start`.
    #[tracing::instrument(skip(runtime))]
    pub fn open(runtime: R, start: &Path) -> Result<Self> {
        let absolute = runtime
            .canonicalize(start)
            .map_err(|_| ModError::WorkspaceNotInitialized {
                root: start.to_path_buf(),
            })?;
        let root = find_root_from(&runtime, &absolute)
            .ok_or(ModError::WorkspaceNotInitialized { root: absolute })?;

        let config_path = root.join(STATE_DIR).join(CONFIG_FILE);
        let config = WorkspaceConfig::load(&runtime, &config_path)?;
        debug!("Opened workspace at {:?}", root);
        Ok(Self::with_root(runtime, root, config))
    }

    fn with_root(runtime: R, root: PathBuf, config: WorkspaceConfig) -> Self {
        Self {
            runtime,
            root,
            config,
            writer: Mutex::new(()),
        }
    }

    /// Remove the state directory. Module directories stay where they are.
    pub fn deinit(self) -> Result<PathBuf> {
        let state_dir = self.state_dir();
        // Wait for any writer in another process to finish
        let lock = self.runtime.lock_exclusive(&self.lock_path())?;
        self.runtime
            .remove_dir_all(&state_dir)
            .map_err(|e| ModError::io("remove", &state_dir, e))?;
        drop(lock);
        info!("Removed workspace state at {:?}", state_dir);
        Ok(self.root)
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.state_dir().join(INDEX_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    pub fn catalog_cache_path(&self) -> PathBuf {
        self.state_dir().join(CATALOG_CACHE_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(CONFIG_FILE)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.state_dir().join(STAGING_DIR)
    }

    /// Lock serializing installs of `key` across processes.
    pub fn module_lock_path(&self, key: &ModuleKey) -> PathBuf {
        self.state_dir()
            .join(LOCKS_DIR)
            .join(format!("{}.lock", key))
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join(&self.config.modules_dir)
    }

    /// Final location of an installed module.
    pub fn module_dir(&self, key: &ModuleKey) -> PathBuf {
        self.modules_dir().join(key.to_string())
    }

    pub fn load_index(&self) -> Result<Index> {
        Index::load(&self.runtime, &self.root, &self.index_path())
    }

    pub fn persist_index(&self, index: &Index) -> Result<()> {
        index.persist(&self.runtime, &self.root, &self.index_path())
    }

    /// Run `f` while holding both the in-process and the cross-process writer lock.
    pub fn with_write_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("Index writer lock poisoned"))?;
        let _lock = self
            .runtime
            .lock_exclusive(&self.lock_path())
            .context("Failed to lock the workspace index")?;
        f()
    }

    /// [`Workspace::with_write_lock`] for async callers. Both locks are only
    /// tried; while either is held elsewhere the task sleeps instead of
    /// blocking its executor thread.
    pub async fn with_write_lock_async<T>(
        &self,
        cancel: &CancellationToken,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let lock_path = self.lock_path();
        loop {
            match self.writer.try_lock() {
                Ok(_guard) => {
                    let file_lock = self
                        .runtime
                        .try_lock_exclusive(&lock_path)
                        .context("Failed to lock the workspace index")?;
                    if let Some(_lock) = file_lock {
                        return f();
                    }
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(anyhow::anyhow!("Index writer lock poisoned"));
                }
                Err(TryLockError::WouldBlock) => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ModError::Cancelled.into()),
                _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
            }
        }
    }

    /// Load the index, apply `f` and persist the result, all under the writer lock.
    /// Nothing is written if `f` fails.
    pub fn update_index<T>(&self, f: impl FnOnce(&mut Index) -> Result<T>) -> Result<T> {
        self.with_write_lock(|| {
            let mut index = self.load_index()?;
            let out = f(&mut index)?;
            self.persist_index(&index)?;
            Ok(out)
        })
    }

    /// Re-read the config from disk, apply `f` and save it, under the writer lock.
    /// Returns the saved config; this handle keeps the one it was opened with.
    pub fn update_config<T>(
        &self,
        f: impl FnOnce(&mut WorkspaceConfig) -> Result<T>,
    ) -> Result<(WorkspaceConfig, T)> {
        self.with_write_lock(|| {
            let path = self.config_path();
            let mut config = WorkspaceConfig::load(&self.runtime, &path)?;
            let out = f(&mut config)?;
            config.save(&self.runtime, &path)?;
            Ok((config, out))
        })
    }

    /// Rebuild the index from the install tree. A corrupted index is replaced.
    #[tracing::instrument(skip(self))]
    pub fn rebuild_index(&self) -> Result<Index> {
        self.with_write_lock(|| {
            let previous = match self.load_index() {
                Ok(index) => index,
                Err(e) if matches!(kind_of(&e), Some(ModError::IndexCorrupted { .. })) => {
                    warn!("{:#}; rebuilding from scratch", e);
                    Index::new()
                }
                Err(e) => return Err(e),
            };
            let rebuilt = scan::rebuild(&self.runtime, &self.modules_dir(), &previous, Utc::now())?;
            self.persist_index(&rebuilt)?;
            info!(
                "Rescanned {:?}: {} module(s) indexed",
                self.modules_dir(),
                rebuilt.len()
            );
            Ok(rebuilt)
        })
    }
}
