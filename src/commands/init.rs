use anyhow::Result;
use std::path::PathBuf;

use super::config::Config;
use crate::catalog::{DEFAULT_REMOTE_NAME, Remote};
use crate::runtime::Runtime;
use crate::workspace::{Workspace, WorkspaceConfig};

/// Create an empty workspace at the configured path. A catalog URL given on
/// the command line becomes the workspace's first remote.
#[tracing::instrument(skip(runtime, config))]
pub fn init<R: Runtime>(runtime: R, config: &Config, jobs: Option<usize>) -> Result<PathBuf> {
    let settings = WorkspaceConfig {
        remotes: config
            .catalog_url
            .iter()
            .map(|url| Remote::new(DEFAULT_REMOTE_NAME, url.as_str()))
            .collect(),
        jobs,
        ..WorkspaceConfig::default()
    };
    let workspace = Workspace::init(runtime, &config.workspace, settings)?;
    println!("Initialized empty workspace in {}", workspace.root().display());
    Ok(workspace.root().to_path_buf())
}

/// Remove the workspace state. Installed module directories are kept.
#[tracing::instrument(skip(runtime, config))]
pub fn deinit<R: Runtime>(runtime: R, config: &Config) -> Result<PathBuf> {
    let workspace = Workspace::open(runtime, &config.workspace)?;
    let modules_dir = workspace.modules_dir();
    let has_modules = workspace.runtime().is_dir(&modules_dir);
    let root = workspace.deinit()?;
    println!("Removed workspace state from {}", root.display());
    if has_modules {
        println!("Module directories in {} were kept", modules_dir.display());
    }
    Ok(root)
}
