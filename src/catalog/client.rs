use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::source::CatalogSource;
use super::{Catalog, Remote};
use crate::error::is_cancelled;
use crate::runtime::{Runtime, write_atomic};
use crate::workspace::Workspace;

/// The last successfully fetched catalog, kept in the workspace state directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CatalogCache {
    /// Remote URLs the catalog was merged from, in order. A cache for any
    /// other set of remotes is ignored.
    pub sources: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub catalog: Catalog,
}

/// Catalog access for one workspace, backed by a cache file.
pub struct CatalogClient<'w, R: Runtime, S: CatalogSource> {
    workspace: &'w Workspace<R>,
    source: S,
    remotes: Vec<Remote>,
}

impl<'w, R: Runtime, S: CatalogSource> CatalogClient<'w, R, S> {
    pub fn new(workspace: &'w Workspace<R>, source: S, remotes: Vec<Remote>) -> Self {
        Self {
            workspace,
            source,
            remotes,
        }
    }

    fn sources(&self) -> Vec<String> {
        self.remotes.iter().map(|remote| remote.url.clone()).collect()
    }

    /// The cached catalog for this client's remotes, if a readable one exists.
    pub fn cached(&self) -> Option<CatalogCache> {
        let path = self.workspace.catalog_cache_path();
        let runtime = self.workspace.runtime();
        if !runtime.exists(&path) {
            return None;
        }

        let cache = runtime.read_to_string(&path).and_then(|contents| {
            serde_json::from_str::<CatalogCache>(&contents).context("Failed to parse catalog cache")
        });
        match cache {
            Ok(cache) if cache.sources == self.sources() => Some(cache),
            Ok(cache) => {
                debug!(
                    "Ignoring catalog cache for [{}] (current remotes are [{}])",
                    cache.sources.join(", "),
                    self.sources().join(", ")
                );
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable catalog cache {:?}: {:#}", path, e);
                None
            }
        }
    }

    /// Fetch every remote, merge the results and refresh the cache.
    ///
    /// A remote that cannot be fetched is skipped with a warning as long as
    /// another one answered. When none did, the first failure is returned.
    pub async fn fetch(&self) -> Result<Catalog> {
        let mut merged = Catalog::new();
        let mut first_error = None;
        let mut answered = 0;

        for remote in &self.remotes {
            match self.source.fetch(&remote.url).await {
                Ok(catalog) => {
                    let releases = catalog.len();
                    let shadowed = merged.merge(catalog);
                    info!(
                        "Remote {}: {} release(s), {} shadowed by earlier remotes",
                        remote.name, releases, shadowed
                    );
                    answered += 1;
                }
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    warn!("Skipping remote {} ({}): {:#}", remote.name, remote.url, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if answered == 0 {
            return Err(first_error.unwrap_or_else(|| anyhow!("No catalog remotes configured")));
        }

        let cache = CatalogCache {
            sources: self.sources(),
            fetched_at: Utc::now(),
            catalog: merged,
        };
        let json = serde_json::to_vec_pretty(&cache).context("Failed to serialize catalog")?;
        let path = self.workspace.catalog_cache_path();
        if let Err(e) = write_atomic(self.workspace.runtime(), &path, &json) {
            warn!("Failed to write catalog cache {:?}: {:#}", path, e);
        }
        Ok(cache.catalog)
    }

    /// The catalog, from cache when `use_cache` is set and a cache exists.
    ///
    /// A failed fetch falls back to a stale cache with a warning. Without a
    /// cache the fetch error is returned. Cancellation is never masked.
    pub async fn get(&self, use_cache: bool) -> Result<Catalog> {
        let cached = self.cached();

        if use_cache && let Some(cache) = cached {
            debug!("Using catalog cached at {}", cache.fetched_at);
            return Ok(cache.catalog);
        }

        match self.fetch().await {
            Ok(catalog) => Ok(catalog),
            Err(e) if is_cancelled(&e) => Err(e),
            Err(e) => match cached {
                Some(cache) => {
                    warn!("{:#}", e);
                    info!(
                        "Using catalog cached at {} instead",
                        cache.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    Ok(cache.catalog)
                }
                None => Err(e),
            },
        }
    }
}
