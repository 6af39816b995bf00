use anyhow::Result;
use log::{info, warn};

use super::config::Config;
use crate::error::ModError;
use crate::module::{InstalledModule, ModuleName, Version, VersionSpec};
use crate::runtime::{Runtime, is_path_under};
use crate::workspace::Workspace;

/// Uninstall one exact version: drop its index record, then its directory.
#[tracing::instrument(skip(runtime, config))]
pub fn remove<R: Runtime>(
    runtime: R,
    config: &Config,
    name: &str,
    version: &str,
) -> Result<InstalledModule> {
    let name: ModuleName = name.parse()?;
    let version: Version = version.parse()?;
    let workspace = Workspace::open(runtime, &config.workspace)?;
    let runtime = workspace.runtime();

    let removed = workspace.with_write_lock(|| {
        let mut index = workspace.load_index()?;
        let module = index
            .remove(&name, &version)
            .ok_or_else(|| ModError::NotFound {
                name: name.clone(),
                spec: VersionSpec::Exact(version),
                available_majors: Vec::new(),
            })?;

        for dependent in index.iter() {
            let needs_it = dependent
                .manifest
                .dependencies
                .iter()
                .any(|dep| dep.name == name && dep.version.matches(&version));
            if needs_it {
                warn!("{} depends on {}", dependent.key(), module.key());
            }
        }

        workspace.persist_index(&index)?;
        if !is_path_under(&module.install_path, &workspace.modules_dir()) {
            warn!(
                "{:?} is outside the install tree and was left in place",
                module.install_path
            );
        } else if runtime.exists(&module.install_path) {
            runtime
                .remove_dir_all(&module.install_path)
                .map_err(|e| ModError::io("remove", &module.install_path, e))?;
        }
        Ok(module)
    })?;

    info!("Removed {} from {:?}", removed.key(), removed.install_path);
    println!("     removed {}", removed.key());
    Ok(removed)
}
