use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::catalog::Remote;
use crate::runtime::{Runtime, write_atomic};

/// Default install tree, relative to the workspace root.
pub const DEFAULT_MODULES_DIR: &str = "Module";

fn default_modules_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MODULES_DIR)
}

/// Per-workspace settings stored in `.modman/config.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Catalog remotes, highest priority first. Empty means the user or
    /// built-in default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,

    /// Install tree, relative to the workspace root unless absolute.
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            remotes: Vec::new(),
            modules_dir: default_modules_dir(),
            jobs: None,
        }
    }
}

impl WorkspaceConfig {
    /// Missing file means defaults.
    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        if !runtime.exists(path) {
            return Ok(Self::default());
        }
        let contents = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read workspace config {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse workspace config {:?}", path))
    }

    pub fn save<R: Runtime + ?Sized>(&self, runtime: &R, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(runtime, path, json.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let config = WorkspaceConfig::load(&runtime, Path::new("/ws/.modman/config.json")).unwrap();
        assert_eq!(config, WorkspaceConfig::default());
        assert_eq!(config.modules_dir, PathBuf::from("Module"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/ws/.modman/config.json");
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(path.clone()))
            .returning(|_| {
                Ok(r#"{"remotes":[{"name":"studio","url":"https://example.com/index.json"}]}"#
                    .into())
            });

        let config = WorkspaceConfig::load(&runtime, &path).unwrap();
        assert_eq!(
            config.remotes,
            vec![Remote::new("studio", "https://example.com/index.json")]
        );
        assert_eq!(config.modules_dir, PathBuf::from("Module"));
        assert_eq!(config.jobs, None);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok("{ not json".into()));

        assert!(WorkspaceConfig::load(&runtime, Path::new("/ws/.modman/config.json")).is_err());
    }

    #[test]
    fn test_empty_remotes_are_not_written() {
        let json = serde_json::to_string(&WorkspaceConfig::default()).unwrap();
        assert!(!json.contains("remotes"));
    }
}
