use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ModError;
use crate::module::{
    ArtifactSource, InstalledModule, ModuleKey, ModuleManifest, ModuleName, Version, VersionSpec,
};
use crate::runtime::path::{is_path_under, relative_path_from_dir, resolve_relative_path};
use crate::runtime::{Runtime, write_atomic};

const INDEX_FORMAT: u32 = 1;

/// On-disk shape of the index file.
#[derive(Serialize, Deserialize, Debug)]
struct IndexFile {
    format: u32,
    #[serde(default)]
    modules: Vec<IndexRecord>,
}

#[derive(Serialize, Deserialize, Debug)]
struct IndexRecord {
    /// Relative to the workspace root unless the module lives outside it.
    path: PathBuf,
    installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<ArtifactSource>,
    manifest: ModuleManifest,
}

fn stored_path(root: &Path, install_path: &Path) -> PathBuf {
    if !is_path_under(install_path, root) {
        return install_path.to_path_buf();
    }
    relative_path_from_dir(root, install_path).unwrap_or_else(|| install_path.to_path_buf())
}

/// Installed modules keyed by (name, version).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    modules: BTreeMap<ModuleKey, InstalledModule>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the index at `path`, resolving stored paths against `root`.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, root: &Path, path: &Path) -> Result<Self> {
        if !runtime.exists(path) {
            return Err(ModError::WorkspaceNotInitialized {
                root: root.to_path_buf(),
            }
            .into());
        }

        let contents = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read index {:?}", path))?;
        Self::parse(&contents, root).map_err(|message| {
            ModError::IndexCorrupted {
                path: path.to_path_buf(),
                message,
            }
            .into()
        })
    }

    fn parse(contents: &str, root: &Path) -> Result<Self, String> {
        let file: IndexFile = serde_json::from_str(contents).map_err(|e| e.to_string())?;
        if file.format != INDEX_FORMAT {
            return Err(format!("unsupported index format {}", file.format));
        }

        let mut index = Index::new();
        for record in file.modules {
            let module = InstalledModule {
                install_path: resolve_relative_path(root, &record.path),
                installed_at: record.installed_at,
                source: record.source,
                manifest: record.manifest,
            };
            let key = module.key();
            if index.modules.insert(key.clone(), module).is_some() {
                return Err(format!("duplicate record for {}", key));
            }
        }
        debug!("Loaded index with {} module(s)", index.len());
        Ok(index)
    }

    /// Writes the index atomically. Paths under `root` are stored relative to
    /// it, anything else absolute so a moved workspace still finds it.
    #[tracing::instrument(skip(self, runtime))]
    pub fn persist<R: Runtime + ?Sized>(&self, runtime: &R, root: &Path, path: &Path) -> Result<()> {
        let modules = self
            .modules
            .values()
            .map(|module| IndexRecord {
                path: stored_path(root, &module.install_path),
                installed_at: module.installed_at,
                source: module.source.clone(),
                manifest: module.manifest.clone(),
            })
            .collect();
        let file = IndexFile {
            format: INDEX_FORMAT,
            modules,
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(runtime, path, json.as_bytes())
            .with_context(|| format!("Failed to persist index {:?}", path))
    }

    pub fn get(&self, key: &ModuleKey) -> Option<&InstalledModule> {
        self.modules.get(key)
    }

    /// Installed module satisfying `spec`, chosen by the same rule the resolver uses.
    pub fn find(&self, name: &ModuleName, spec: &VersionSpec) -> Option<&InstalledModule> {
        let version = spec.select(self.versions(name))?;
        self.modules.get(&ModuleKey::new(name.clone(), version))
    }

    /// Installed versions of `name`, ascending.
    pub fn versions<'a>(&'a self, name: &'a ModuleName) -> impl Iterator<Item = Version> + 'a {
        self.modules
            .keys()
            .filter(move |key| &key.name == name)
            .map(|key| key.version)
    }

    /// Inserts or replaces the record for the module's key.
    pub fn upsert(&mut self, module: InstalledModule) -> Option<InstalledModule> {
        self.modules.insert(module.key(), module)
    }

    pub fn remove(&mut self, name: &ModuleName, version: &Version) -> Option<InstalledModule> {
        self.modules
            .remove(&ModuleKey::new(name.clone(), *version))
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledModule> {
        self.modules.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ModuleKey> {
        self.modules.keys()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
