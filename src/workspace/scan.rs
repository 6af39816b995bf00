use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use super::Index;
use crate::module::{InstalledModule, MANIFEST_FILE_NAME, ModuleManifest};
use crate::runtime::Runtime;

/// Find every module directory under `root`, i.e. every directory holding a
/// `module.json`. Module directories are not searched further.
///
/// Hidden directories (such as `.modman`) are skipped.
#[tracing::instrument(skip(runtime, root))]
pub fn find_module_dirs<R: Runtime + ?Sized>(runtime: &R, root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    if !runtime.exists(root) {
        return Ok(found);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if runtime.exists(&dir.join(MANIFEST_FILE_NAME)) {
            found.push(dir);
            continue;
        }
        let mut children = runtime.read_dir(&dir)?;
        children.sort();
        for child in children.into_iter().rev() {
            let hidden = child
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if !hidden && runtime.is_dir(&child) {
                pending.push(child);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Reconstruct the index from the modules present under `root`.
///
/// Records of `previous` whose directory still holds the same module keep their
/// install time and artifact source; everything else is taken from disk. Records
/// whose directory disappeared are dropped. Unreadable manifests are skipped with
/// a warning, as is a second directory claiming an already seen (name, version).
pub fn rebuild<R: Runtime + ?Sized>(
    runtime: &R,
    root: &Path,
    previous: &Index,
    now: DateTime<Utc>,
) -> Result<Index> {
    let mut index = Index::new();

    for dir in find_module_dirs(runtime, root)? {
        let manifest = match ModuleManifest::load(runtime, &dir.join(MANIFEST_FILE_NAME)) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Skipping {:?}: {:#}", dir, e);
                continue;
            }
        };
        let key = manifest.key();

        if let Some(existing) = index.get(&key) {
            warn!(
                "Skipping {:?}: {} is already provided by {:?}",
                dir, key, existing.install_path
            );
            continue;
        }

        let (installed_at, source) = match previous.get(&key) {
            Some(old) if old.install_path == dir => (old.installed_at, old.source.clone()),
            _ => (now, None),
        };

        debug!("Found {} at {:?}", key, dir);
        index.upsert(InstalledModule {
            manifest,
            install_path: dir,
            installed_at,
            source,
        });
    }

    for dropped in previous.keys().filter(|k| index.get(k).is_none()) {
        debug!("{} is no longer on disk", dropped);
    }

    Ok(index)
}
