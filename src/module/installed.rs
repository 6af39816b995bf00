use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::manifest::{MANIFEST_FILE_NAME, ModuleKey, ModuleManifest};

/// Where an installed module's artifact came from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    pub url: String,
    pub sha256: String,
}

/// A module present in the workspace index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledModule {
    pub manifest: ModuleManifest,
    /// Absolute path of the module directory.
    pub install_path: PathBuf,
    pub installed_at: DateTime<Utc>,
    /// `None` for modules discovered by a rescan rather than installed from the catalog.
    pub source: Option<ArtifactSource>,
}

impl InstalledModule {
    pub fn key(&self) -> ModuleKey {
        self.manifest.key()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.install_path.join(MANIFEST_FILE_NAME)
    }

    pub fn public_include_folder(&self) -> Option<PathBuf> {
        self.manifest
            .public_include_folder
            .as_ref()
            .map(|p| self.install_path.join(p))
    }

    pub fn schema_files(&self) -> Vec<PathBuf> {
        self.manifest
            .schema_files
            .iter()
            .map(|p| self.install_path.join(p))
            .collect()
    }
}
