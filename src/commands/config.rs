use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::{DEFAULT_CATALOG_URL, DEFAULT_REMOTE_NAME, Remote};
use crate::runtime::Runtime;
use crate::workspace::WorkspaceConfig;

/// Release channel consulted by `update` when nothing else names one.
pub const DEFAULT_UPDATE_URL: &str = "https://modules.modman.dev/modman/channel.json";

/// Optional per-user settings in `<config_dir>/modman/config.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_url: Option<String>,
}

impl UserConfig {
    pub fn path<R: Runtime + ?Sized>(runtime: &R) -> Option<PathBuf> {
        runtime
            .config_dir()
            .map(|dir| dir.join("modman").join("config.json"))
    }

    /// Missing directory or file means defaults.
    pub fn load<R: Runtime + ?Sized>(runtime: &R) -> Result<Self> {
        let Some(path) = Self::path(runtime) else {
            return Ok(Self::default());
        };
        if !runtime.exists(&path) {
            return Ok(Self::default());
        }
        debug!("Loading user config from {:?}", path);
        let contents = runtime
            .read_to_string(&path)
            .with_context(|| format!("Failed to read user config {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse user config {:?}", path))
    }
}

/// Name given to a catalog URL passed on the command line or in the environment.
pub const COMMAND_LINE_REMOTE_NAME: &str = "command-line";

/// Settings shared by every command.
///
/// A catalog URL given on the command line or in the environment replaces the
/// workspace's remotes for that run. Workspace remotes win over the user
/// config, which wins over the built-in default.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: PathBuf,
    pub catalog_url: Option<String>,
    pub update_url: Option<String>,
    pub user: UserConfig,
}

impl Config {
    pub fn new<R: Runtime + ?Sized>(
        runtime: &R,
        workspace: PathBuf,
        catalog_url: Option<String>,
        update_url: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            workspace,
            catalog_url,
            update_url,
            user: UserConfig::load(runtime)?,
        })
    }

    /// Remotes to fetch the catalog from, highest priority first. Never empty.
    pub fn remotes(&self, workspace: &WorkspaceConfig) -> Vec<Remote> {
        if let Some(url) = &self.catalog_url {
            return vec![Remote::new(COMMAND_LINE_REMOTE_NAME, url.as_str())];
        }
        if !workspace.remotes.is_empty() {
            return workspace.remotes.clone();
        }
        let url = self
            .user
            .catalog_url
            .clone()
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());
        vec![Remote::new(DEFAULT_REMOTE_NAME, url)]
    }

    pub fn update_url(&self) -> String {
        self.update_url
            .clone()
            .or_else(|| self.user.update_url.clone())
            .unwrap_or_else(|| DEFAULT_UPDATE_URL.to_string())
    }
}
