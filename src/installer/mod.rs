//! Materializes resolved modules into the workspace.
//!
//! Each module is downloaded, verified and extracted inside its own staging
//! directory under `.modman/staging`. Only a fully prepared module is moved
//! into `<modules_dir>/<name>-<version>` and recorded in the index, both
//! under the index writer lock. Anything that fails or is cancelled before
//! that point is removed with its staging directory.
//!
//! Installs of one key are serialized across processes by a lock file under
//! `.modman/locks`. Whoever gets it second finds the record already committed
//! and returns it without downloading.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt, stream};
use log::{debug, info, warn};
use reqwest::Url;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveExtractor;
use crate::catalog::{Catalog, CatalogRelease};
use crate::cleanup::CleanupGuard;
use crate::download::{checksum_matches, download_file, sha256_file};
use crate::error::ModError;
use crate::http::HttpClient;
use crate::module::{
    ArtifactSource, InstalledModule, MANIFEST_FILE_NAME, ModuleKey, ModuleManifest, VersionSpec,
};
use crate::resolver::ResolutionPlan;
use crate::runtime::{Runtime, lock_exclusive_async};
use crate::workspace::{Index, Workspace};

/// Parallel downloads when neither flag nor config set one.
pub const DEFAULT_JOBS: usize = 4;

/// Name of the extracted tree inside a staging directory.
const STAGED_CONTENT_DIR: &str = "content";

type InFlight = Arc<OnceCell<InstalledModule>>;

pub struct Installer<'w, R: Runtime + 'static, E: ArchiveExtractor> {
    workspace: &'w Workspace<R>,
    catalog: &'w Catalog,
    http: HttpClient,
    extractor: E,
    jobs: usize,
    cancel: CancellationToken,
    in_flight: Mutex<HashMap<ModuleKey, InFlight>>,
}

impl<'w, R: Runtime + 'static, E: ArchiveExtractor> Installer<'w, R, E> {
    pub fn new(
        workspace: &'w Workspace<R>,
        catalog: &'w Catalog,
        http: HttpClient,
        extractor: E,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workspace,
            catalog,
            http,
            extractor,
            jobs: DEFAULT_JOBS,
            cancel,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Make every module in `plan` present, returning their records in plan order.
    ///
    /// Modules already in the index are skipped without network access. The
    /// rest are installed wave by wave, so a dependency is always committed
    /// before anything that depends on it.
    #[tracing::instrument(skip(self, plan))]
    pub async fn ensure_installed(&self, plan: &ResolutionPlan) -> Result<Vec<InstalledModule>> {
        let index = self.workspace.load_index()?;
        let mut done: HashMap<ModuleKey, InstalledModule> = plan
            .keys()
            .filter_map(|key| self.present(&index, key))
            .map(|module| (module.key(), module.clone()))
            .collect();
        debug!(
            "{} of {} planned module(s) already installed",
            done.len(),
            plan.len()
        );

        for wave in plan.waves() {
            let pending: Vec<ModuleKey> = wave
                .into_iter()
                .filter(|key| !done.contains_key(key))
                .collect();
            if pending.is_empty() {
                continue;
            }

            let installed: Vec<InstalledModule> = stream::iter(pending)
                .map(|key| self.install_one(key))
                .buffer_unordered(self.jobs)
                .try_collect()
                .await?;
            for module in installed {
                done.insert(module.key(), module);
            }
        }

        plan.keys()
            .map(|key| {
                done.remove(key)
                    .ok_or_else(|| anyhow!("{} was planned but not installed", key))
            })
            .collect()
    }

    /// An index record whose directory has vanished counts as not installed.
    fn present<'i>(&self, index: &'i Index, key: &ModuleKey) -> Option<&'i InstalledModule> {
        let module = index.get(key)?;
        if self.workspace.runtime().is_dir(&module.install_path) {
            Some(module)
        } else {
            debug!(
                "{} is indexed but {:?} is missing; reinstalling",
                key, module.install_path
            );
            None
        }
    }

    /// Install `key` once per installer, however many callers ask for it.
    async fn install_one(&self, key: ModuleKey) -> Result<InstalledModule> {
        let cell = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| anyhow!("Install tracker lock poisoned"))?;
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };

        let module = cell
            .get_or_try_init(|| self.stage_and_commit(&key))
            .await
            .with_context(|| format!("Failed to install {}", key))?;
        Ok(module.clone())
    }

    #[tracing::instrument(skip(self))]
    async fn stage_and_commit(&self, key: &ModuleKey) -> Result<InstalledModule> {
        let runtime = self.workspace.runtime();
        let lock_path = self.workspace.module_lock_path(key);
        if let Some(locks_dir) = lock_path.parent() {
            runtime
                .create_dir_all(locks_dir)
                .map_err(|e| ModError::io("create", locks_dir, e))?;
        }
        let _key_lock = lock_exclusive_async(runtime, &lock_path, &self.cancel).await?;

        // Another process may have committed it since the plan was made
        if let Some(module) = self.present(&self.workspace.load_index()?, key) {
            debug!("{} was installed by another process", key);
            return Ok(module.clone());
        }

        let release = self
            .catalog
            .release(&key.name, &key.version)
            .ok_or_else(|| ModError::NotFound {
                name: key.name.clone(),
                spec: VersionSpec::Exact(key.version),
                available_majors: Vec::new(),
            })?;

        let staging = CleanupGuard::staging_dir(runtime, &self.workspace.staging_root(), key)?;

        println!(" downloading {}", key);
        let archive = staging.path().join(archive_file_name(release));
        download_file(runtime, &release.url, &archive, &self.http, &self.cancel).await?;

        let actual = sha256_file(runtime, &archive)?;
        if !checksum_matches(&release.sha256, &actual) {
            return Err(ModError::ChecksumMismatch {
                key: key.clone(),
                expected: release.sha256.clone(),
                actual,
            }
            .into());
        }
        self.check_cancelled()?;

        let content = staging.path().join(STAGED_CONTENT_DIR);
        runtime
            .create_dir_all(&content)
            .map_err(|e| ModError::io("create", &content, e))?;
        self.extractor
            .extract(runtime, &archive, &content)
            .map_err(|e| ModError::io("extract", &archive, e))?;
        runtime
            .remove_file(&archive)
            .map_err(|e| ModError::io("remove", &archive, e))?;

        let manifest_path = content.join(MANIFEST_FILE_NAME);
        let manifest = ModuleManifest::load(runtime, &manifest_path)
            .map_err(|e| ModError::io("load manifest of", &manifest_path, e))?;
        if manifest.key() != *key {
            return Err(ModError::Io {
                operation: "verify".into(),
                path: manifest_path,
                message: format!("archive contains {} instead of {}", manifest.key(), key),
            }
            .into());
        }
        self.check_cancelled()?;

        let source = ArtifactSource {
            url: release.url.clone(),
            sha256: actual,
        };
        self.commit(key, &content, manifest, source).await
    }

    /// Move the staged tree into place and record it. The index write and the
    /// move happen under the writer lock; a failed index write undoes the move.
    async fn commit(
        &self,
        key: &ModuleKey,
        content: &Path,
        manifest: ModuleManifest,
        source: ArtifactSource,
    ) -> Result<InstalledModule> {
        let runtime = self.workspace.runtime();
        let final_dir = self.workspace.module_dir(key);

        self.workspace.with_write_lock_async(&self.cancel, || {
            let mut index = self.workspace.load_index()?;
            if let Some(existing) = self.present(&index, key) {
                debug!("{} was committed concurrently", key);
                return Ok(existing.clone());
            }

            if runtime.exists(&final_dir) {
                warn!("Replacing unindexed directory {:?}", final_dir);
                runtime
                    .remove_dir_all(&final_dir)
                    .map_err(|e| ModError::io("remove", &final_dir, e))?;
            }
            if let Some(parent) = final_dir.parent() {
                runtime
                    .create_dir_all(parent)
                    .map_err(|e| ModError::io("create", parent, e))?;
            }
            runtime
                .rename(content, &final_dir)
                .map_err(|e| ModError::io("move module into", &final_dir, e))?;

            let module = InstalledModule {
                manifest,
                install_path: final_dir.clone(),
                installed_at: Utc::now(),
                source: Some(source),
            };
            index.upsert(module.clone());
            if let Err(e) = self.workspace.persist_index(&index) {
                if let Err(undo) = runtime.remove_dir_all(&final_dir) {
                    warn!(
                        "Failed to remove {:?} after index write failure: {:#}",
                        final_dir, undo
                    );
                }
                return Err(e);
            }

            info!("Installed {} to {:?}", key, final_dir);
            println!("   installed {}", key);
            Ok(module)
        })
        .await
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ModError::Cancelled.into());
        }
        Ok(())
    }
}

/// File name for a downloaded artifact, taken from the last URL path segment
/// so the extractor can pick the format.
fn archive_file_name(release: &CatalogRelease) -> String {
    Url::parse(&release.url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("artifact-{}", release.version))
}
