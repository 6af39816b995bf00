use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use super::version::{Version, VersionSpec};
use crate::error::ModError;
use crate::runtime::Runtime;

/// File name of the manifest at the root of every module directory.
pub const MANIFEST_FILE_NAME: &str = "module.json";

/// A validated module name: ASCII letters, digits, `.`, `_` and `-`, not
/// starting with `.` and never containing `..`. Names end up as directory
/// names, so this keeps them from escaping the install tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName(String);

impl ModuleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ModuleName {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid_chars = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if s.is_empty() || !valid_chars || s.starts_with('.') || s.contains("..") {
            return Err(ModError::invalid_argument(format!(
                "'{}' is not a valid module name",
                s
            )));
        }
        Ok(ModuleName(s.to_string()))
    }
}

impl TryFrom<String> for ModuleName {
    type Error = ModError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an installed or installable module. Displays as `name-version`,
/// which is also its directory name under the install tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleKey {
    pub name: ModuleName,
    pub version: Version,
}

impl ModuleKey {
    pub fn new(name: ModuleName, version: Version) -> Self {
        Self { name, version }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModuleKind {
    Plugin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_version: Option<Version>,
    },
    Subsystem {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_version: Option<Version>,
    },
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Plugin { .. } => "plugin",
            ModuleKind::Subsystem { .. } => "subsystem",
        }
    }

    pub fn api_version(&self) -> Option<Version> {
        match self {
            ModuleKind::Plugin { api_version } | ModuleKind::Subsystem { api_version } => {
                *api_version
            }
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: ModuleName,
    pub version: VersionSpec,
}

/// Contents of `module.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModuleManifest {
    pub name: ModuleName,
    pub version: Version,
    pub kind: ModuleKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    /// Relative to the module directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_include_folder: Option<PathBuf>,

    /// Relative to the module directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_files: Vec<PathBuf>,
}

impl ModuleManifest {
    pub fn key(&self) -> ModuleKey {
        ModuleKey::new(self.name.clone(), self.version)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let manifest: ModuleManifest =
            serde_json::from_str(contents).context("Failed to parse module manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        let contents = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Invalid manifest {:?}", path))
    }

    /// Rejects manifests whose declared paths point outside the module directory.
    pub fn validate(&self) -> Result<()> {
        let declared = self
            .public_include_folder
            .iter()
            .chain(self.schema_files.iter());
        for path in declared {
            if !is_contained_relative(path) {
                return Err(ModError::invalid_argument(format!(
                    "{} declares path {:?} outside of its module directory",
                    self.key(),
                    path
                ))
                .into());
            }
        }
        Ok(())
    }
}

fn is_contained_relative(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::*;

    const SAMPLE: &str = r#"{
        "name": "nos.sys.vulkan",
        "version": "5.3.0",
        "kind": { "type": "subsystem", "api_version": "1.2.0" },
        "dependencies": [{ "name": "nos.core", "version": "1.4" }],
        "public_include_folder": "Include",
        "schema_files": ["Config/Vulkan.fbs"]
    }"#;

    #[test]
    fn test_module_name_validation() {
        assert!("nos.sys.vulkan".parse::<ModuleName>().is_ok());
        assert!("my_module-2".parse::<ModuleName>().is_ok());
        assert!("".parse::<ModuleName>().is_err());
        assert!(".hidden".parse::<ModuleName>().is_err());
        assert!("a..b".parse::<ModuleName>().is_err());
        assert!("a/b".parse::<ModuleName>().is_err());
        assert!("a b".parse::<ModuleName>().is_err());
    }

    #[test]
    fn test_module_key_display() {
        let key = ModuleKey::new("foo".parse().unwrap(), Version::new(1, 2, 3));
        assert_eq!(key.to_string(), "foo-1.2.3");
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = ModuleManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.name.as_str(), "nos.sys.vulkan");
        assert_eq!(manifest.version, Version::new(5, 3, 0));
        assert_eq!(manifest.kind.as_str(), "subsystem");
        assert_eq!(manifest.kind.api_version(), Some(Version::new(1, 2, 0)));
        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(
            manifest.dependencies[0].version,
            VersionSpec::Relaxed { major: 1, minor: 4 }
        );
        assert_eq!(manifest.public_include_folder, Some(PathBuf::from("Include")));
    }

    #[test]
    fn test_parse_minimal_plugin_manifest() {
        let manifest = ModuleManifest::parse(
            r#"{"name":"p","version":"0.1.0","kind":{"type":"plugin"}}"#,
        )
        .unwrap();
        assert_eq!(manifest.kind, ModuleKind::Plugin { api_version: None });
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.public_include_folder.is_none());
    }

    #[test]
    fn test_manifest_rejects_escaping_paths() {
        let json = r#"{"name":"p","version":"0.1.0","kind":{"type":"plugin"},
            "public_include_folder":"../../etc"}"#;
        assert!(ModuleManifest::parse(json).is_err());

        let json = r#"{"name":"p","version":"0.1.0","kind":{"type":"plugin"},
            "schema_files":["/abs/schema.fbs"]}"#;
        assert!(ModuleManifest::parse(json).is_err());

        let json = r#"{"name":"p","version":"0.1.0","kind":{"type":"plugin"},
            "schema_files":["Config/../Schema/a.fbs"]}"#;
        assert!(ModuleManifest::parse(json).is_ok());
    }

    #[test]
    fn test_load_manifest_through_runtime() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/ws/Module/nos.sys.vulkan-5.3.0/module.json");
        runtime
            .expect_read_to_string()
            .with(eq(path.clone()))
            .returning(|_| Ok(SAMPLE.to_string()));

        let manifest = ModuleManifest::load(&runtime, &path).unwrap();
        assert_eq!(manifest.key().to_string(), "nos.sys.vulkan-5.3.0");
    }
}
