use anyhow::Result;
use glob::Pattern;
use log::debug;

use super::config::Config;
use crate::error::ModError;
use crate::module::ModuleKey;
use crate::runtime::Runtime;
use crate::runtime::path::relative_path_from_dir;
use crate::workspace::Workspace;

/// Print installed modules as `name-version  path`, optionally filtered by a
/// glob over module names.
#[tracing::instrument(skip(runtime, config))]
pub fn list<R: Runtime>(runtime: R, config: &Config, pattern: Option<&str>) -> Result<Vec<ModuleKey>> {
    let pattern = pattern
        .map(Pattern::new)
        .transpose()
        .map_err(|e| ModError::invalid_argument(format!("Invalid pattern: {}", e)))?;
    let workspace = Workspace::open(runtime, &config.workspace)?;
    let index = workspace.load_index()?;

    let modules: Vec<_> = index
        .iter()
        .filter(|module| {
            pattern
                .as_ref()
                .is_none_or(|p| p.matches(module.manifest.name.as_str()))
        })
        .collect();
    debug!("{} of {} module(s) match", modules.len(), index.len());

    if modules.is_empty() {
        println!("No modules installed.");
        return Ok(Vec::new());
    }

    for module in &modules {
        let path = relative_path_from_dir(workspace.root(), &module.install_path)
            .unwrap_or_else(|| module.install_path.clone());
        let missing = if workspace.runtime().is_dir(&module.install_path) {
            ""
        } else {
            " (missing, run `modman rescan`)"
        };
        println!("{}  {}{}", module.key(), path.display(), missing);
    }
    Ok(modules.iter().map(|module| module.key()).collect())
}
