//! Version selection and dependency closure.
//!
//! Candidates come from the workspace index first and the catalog second. A
//! resolver built without a catalog only sees what is installed.

mod closure;

use anyhow::Result;
use log::warn;

pub use closure::{PlanNode, ResolutionPlan};

use crate::catalog::Catalog;
use crate::error::ModError;
use crate::module::{Dependency, ModuleKey, ModuleName, Version, VersionSpec};
use crate::workspace::Index;

/// What to do when no candidate shares the requested major version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MajorFallback {
    /// Fail with `NotFound`.
    #[default]
    Deny,
    /// Use the newest version of the nearest available major and log a warning.
    WarnAndSubstitute,
}

pub struct Resolver<'a> {
    index: &'a Index,
    catalog: Option<&'a Catalog>,
    fallback: MajorFallback,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a Index, catalog: Option<&'a Catalog>) -> Self {
        Self {
            index,
            catalog,
            fallback: MajorFallback::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: MajorFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Every known version of `name`, ascending and without duplicates.
    pub fn candidates(&self, name: &ModuleName) -> Vec<Version> {
        let mut versions: Vec<Version> = self.index.versions(name).collect();
        if let Some(catalog) = self.catalog {
            versions.extend(catalog.versions(name));
        }
        versions.sort();
        versions.dedup();
        versions
    }

    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, name: &ModuleName, spec: &VersionSpec) -> Result<Version> {
        let candidates = self.candidates(name);
        if let Some(version) = spec.select(candidates.iter().copied()) {
            return Ok(version);
        }

        let majors = nearest_majors(&candidates, spec.major());
        let major_missing = majors.first().is_some_and(|m| *m != spec.major());
        if self.fallback == MajorFallback::WarnAndSubstitute
            && major_missing
            && let Some(version) = candidates
                .iter()
                .filter(|v| v.major == majors[0])
                .max()
                .copied()
        {
            warn!(
                "No {} {} available; substituting {} from major version {}",
                name, spec, version, version.major
            );
            return Ok(version);
        }

        Err(ModError::NotFound {
            name: name.clone(),
            spec: *spec,
            available_majors: majors,
        }
        .into())
    }

    /// Declared dependencies of a resolved version: from its installed
    /// manifest when present, otherwise from its catalog release.
    pub fn dependencies_of(&self, key: &ModuleKey) -> Result<Vec<Dependency>> {
        if let Some(installed) = self.index.get(key) {
            return Ok(installed.manifest.dependencies.clone());
        }
        if let Some(release) = self
            .catalog
            .and_then(|catalog| catalog.release(&key.name, &key.version))
        {
            return Ok(release.dependencies.clone());
        }
        Err(ModError::NotFound {
            name: key.name.clone(),
            spec: VersionSpec::Exact(key.version),
            available_majors: Vec::new(),
        }
        .into())
    }

    /// Resolve `name` and everything it transitively depends on.
    #[tracing::instrument(skip(self))]
    pub fn resolve_closure(&self, name: &ModuleName, spec: &VersionSpec) -> Result<ResolutionPlan> {
        closure::build(self, name, spec)
    }
}

/// Distinct majors among `candidates`, nearest to `requested` first.
/// Equal distances list the higher major first.
fn nearest_majors(candidates: &[Version], requested: u32) -> Vec<u32> {
    let mut majors: Vec<u32> = candidates.iter().map(|v| v.major).collect();
    majors.sort_unstable();
    majors.dedup();
    majors.sort_by_key(|m| (m.abs_diff(requested), std::cmp::Reverse(*m)));
    majors
}
