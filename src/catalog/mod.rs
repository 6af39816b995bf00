//! Remote catalog of installable module releases.
//!
//! Each remote URL serves a list of `{ "name", "url" }` entries. Each entry's
//! URL serves that module's release list. Relative URLs are resolved against
//! the document they appear in. A workspace may name several remotes; their
//! catalogs are merged in order, so a release published by two remotes comes
//! from the first.

mod client;
mod source;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

pub use client::{CatalogCache, CatalogClient};
pub use source::{CatalogSource, HttpCatalogSource};

#[cfg(test)]
pub use source::MockCatalogSource;

use crate::module::{Dependency, ModuleKind, ModuleName, Version};

/// Default catalog location when neither flag, environment nor config name one.
pub const DEFAULT_CATALOG_URL: &str = "https://modules.modman.dev/catalog/index.json";

/// Name of the remote used when none is configured.
pub const DEFAULT_REMOTE_NAME: &str = "default";

/// A named catalog location.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// One publishable version of a module.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CatalogRelease {
    pub version: Version,
    pub url: String,
    pub sha256: String,
    pub kind: ModuleKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

/// Entry of the top-level catalog document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: ModuleName,
    pub url: String,
}

/// A module's release list document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseList {
    pub name: ModuleName,
    #[serde(default)]
    pub releases: Vec<CatalogRelease>,
}

/// All known releases, by name then version.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    modules: BTreeMap<ModuleName, BTreeMap<Version, CatalogRelease>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: ModuleName, release: CatalogRelease) -> Option<CatalogRelease> {
        self.modules
            .entry(name)
            .or_default()
            .insert(release.version, release)
    }

    pub fn release(&self, name: &ModuleName, version: &Version) -> Option<&CatalogRelease> {
        self.modules.get(name)?.get(version)
    }

    /// Published versions of `name`, ascending.
    pub fn versions<'a>(&'a self, name: &ModuleName) -> impl Iterator<Item = Version> + 'a {
        self.modules
            .get(name)
            .into_iter()
            .flat_map(|releases| releases.keys().copied())
    }

    /// Add the releases of `other` that this catalog does not have yet.
    /// Returns how many of `other`'s releases were shadowed.
    pub fn merge(&mut self, other: Catalog) -> usize {
        let mut shadowed = 0;
        for (name, releases) in other.modules {
            let known = self.modules.entry(name).or_default();
            for (version, release) in releases {
                match known.entry(version) {
                    Entry::Vacant(slot) => {
                        slot.insert(release);
                    }
                    Entry::Occupied(_) => shadowed += 1,
                }
            }
        }
        shadowed
    }

    /// Number of releases across all modules.
    pub fn len(&self) -> usize {
        self.modules.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
