//! Module identity: names, versions, version requests and manifests.

mod installed;
mod manifest;
mod version;

pub use installed::{ArtifactSource, InstalledModule};
pub use manifest::{
    Dependency, MANIFEST_FILE_NAME, ModuleKey, ModuleKind, ModuleManifest, ModuleName,
};
pub use version::{Version, VersionSpec};
