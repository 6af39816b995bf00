use anyhow::Result;
use log::warn;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::services::{build_catalog_source, build_http_client};
use crate::catalog::CatalogClient;
use crate::error::is_cancelled;
use crate::module::ModuleKey;
use crate::runtime::Runtime;
use crate::workspace::{Index, Workspace};

/// Rebuild the index from the install tree, optionally refreshing the
/// cached catalog first. A catalog that cannot be fetched does not stop
/// the rebuild.
#[tracing::instrument(skip(runtime, config, cancel))]
pub async fn rescan<R: Runtime>(
    runtime: R,
    config: &Config,
    fetch_index: bool,
    cancel: CancellationToken,
) -> Result<Index> {
    let workspace = Workspace::open(runtime, &config.workspace)?;

    if fetch_index {
        let http = build_http_client()?;
        let client = CatalogClient::new(
            &workspace,
            build_catalog_source(&http, &cancel),
            config.remotes(workspace.config()),
        );
        match client.get(false).await {
            Ok(catalog) => println!("   refreshed catalog, {} release(s)", catalog.len()),
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                warn!("Catalog refresh failed: {:#}", e);
                println!("     skipped catalog refresh ({:#})", e);
            }
        }
    }

    let before: BTreeSet<ModuleKey> = workspace
        .load_index()
        .map(|index| index.keys().cloned().collect())
        .unwrap_or_default();
    let rebuilt = workspace.rebuild_index()?;

    for key in rebuilt.keys().filter(|key| !before.contains(*key)) {
        println!("     adopted {}", key);
    }
    for key in before.iter().filter(|key| rebuilt.get(key).is_none()) {
        println!("     dropped {}", key);
    }
    println!("Indexed {} module(s)", rebuilt.len());
    Ok(rebuilt)
}
