use anyhow::Result;
use log::debug;
use reqwest::Url;

use super::config::Config;
use crate::catalog::{DEFAULT_REMOTE_NAME, Remote};
use crate::error::ModError;
use crate::runtime::Runtime;
use crate::workspace::Workspace;

/// Pick a name for a remote added without one: the URL's host, suffixed
/// with `-2`, `-3`, ... until it is unused.
fn unique_name(url: &Url, taken: &[Remote]) -> String {
    let base = url.host_str().unwrap_or(DEFAULT_REMOTE_NAME).to_string();
    let in_use = |name: &str| taken.iter().any(|remote| remote.name == name);
    if !in_use(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !in_use(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Append a catalog remote to the workspace. Remotes added later rank lower.
#[tracing::instrument(skip(runtime, config))]
pub fn remote_add<R: Runtime>(
    runtime: R,
    config: &Config,
    url: &str,
    name: Option<&str>,
) -> Result<Remote> {
    let parsed = Url::parse(url)
        .map_err(|e| ModError::invalid_argument(format!("Invalid remote URL {}: {}", url, e)))?;
    let workspace = Workspace::open(runtime, &config.workspace)?;

    let (_, remote) = workspace.update_config(|settings| {
        if settings.remotes.iter().any(|remote| remote.url == url) {
            let message = format!("Remote {} already exists", url);
            return Err(ModError::invalid_argument(message).into());
        }
        let name = match name {
            Some(name) if settings.remotes.iter().any(|remote| remote.name == name) => {
                return Err(
                    ModError::invalid_argument(format!("Remote name {} is taken", name)).into(),
                );
            }
            Some(name) => name.to_string(),
            None => unique_name(&parsed, &settings.remotes),
        };
        let remote = Remote::new(name, url);
        settings.remotes.push(remote.clone());
        Ok(remote)
    })?;

    println!("Remote added: {} {}", remote.name, remote.url);
    Ok(remote)
}

/// Print the workspace remotes in priority order.
#[tracing::instrument(skip(runtime, config))]
pub fn remote_list<R: Runtime>(runtime: R, config: &Config) -> Result<Vec<Remote>> {
    let workspace = Workspace::open(runtime, &config.workspace)?;
    let remotes = workspace.config().remotes.clone();

    if remotes.is_empty() {
        let effective = config.remotes(workspace.config());
        let urls: Vec<&str> = effective.iter().map(|remote| remote.url.as_str()).collect();
        println!("No remotes configured; using {}", urls.join(", "));
        return Ok(remotes);
    }
    for remote in &remotes {
        println!("{}  {}", remote.name, remote.url);
    }
    Ok(remotes)
}

/// Remove a remote by name or URL.
#[tracing::instrument(skip(runtime, config))]
pub fn remote_remove<R: Runtime>(runtime: R, config: &Config, target: &str) -> Result<Remote> {
    let workspace = Workspace::open(runtime, &config.workspace)?;

    let (saved, removed) = workspace.update_config(|settings| {
        let position = settings
            .remotes
            .iter()
            .position(|remote| remote.name == target || remote.url == target)
            .ok_or_else(|| ModError::invalid_argument(format!("No remote named {}", target)))?;
        Ok(settings.remotes.remove(position))
    })?;
    debug!("{} remote(s) left", saved.remotes.len());

    println!("Remote removed: {} {}", removed.name, removed.url);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::config::UserConfig;
    use crate::error::exit_code;
    use crate::runtime::RealRuntime;
    use crate::workspace::WorkspaceConfig;
    use std::path::Path;
    use tempfile::tempdir;

    const MAIN: &str = "https://modules.example.com/index.json";
    const MIRROR: &str = "https://mirror.example.org/index.json";

    fn config(path: &Path) -> Config {
        Config {
            workspace: path.to_path_buf(),
            catalog_url: None,
            update_url: None,
            user: UserConfig::default(),
        }
    }

    fn saved_remotes(path: &Path) -> Vec<Remote> {
        Workspace::open(RealRuntime, path)
            .unwrap()
            .config()
            .remotes
            .clone()
    }

    #[test]
    fn test_remotes_keep_insertion_order() {
        let dir = tempdir().unwrap();
        Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();
        let config = config(dir.path());

        let first = remote_add(RealRuntime, &config, MAIN, None).unwrap();
        let second = remote_add(RealRuntime, &config, MIRROR, Some("mirror")).unwrap();

        assert_eq!(first.name, "modules.example.com");
        assert_eq!(second.name, "mirror");
        assert_eq!(saved_remotes(dir.path()), vec![first, second.clone()]);
        assert_eq!(
            remote_list(RealRuntime, &config).unwrap(),
            saved_remotes(dir.path())
        );

        let ws = Workspace::open(RealRuntime, dir.path()).unwrap();
        assert_eq!(config.remotes(ws.config())[1], second);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let dir = tempdir().unwrap();
        Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();
        let config = config(dir.path());
        remote_add(RealRuntime, &config, MAIN, Some("main")).unwrap();

        let err = remote_add(RealRuntime, &config, MAIN, Some("other")).unwrap_err();
        assert_eq!(exit_code(&err), 2);
        let err = remote_add(RealRuntime, &config, MIRROR, Some("main")).unwrap_err();
        assert_eq!(exit_code(&err), 2);
        let err = remote_add(RealRuntime, &config, "not a url", None).unwrap_err();
        assert_eq!(exit_code(&err), 2);

        assert_eq!(saved_remotes(dir.path()).len(), 1);
    }

    #[test]
    fn test_generated_names_are_unique() {
        let dir = tempdir().unwrap();
        Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();
        let config = config(dir.path());

        remote_add(RealRuntime, &config, "https://cdn.example.com/a.json", None).unwrap();
        let second =
            remote_add(RealRuntime, &config, "https://cdn.example.com/b.json", None).unwrap();
        let third =
            remote_add(RealRuntime, &config, "https://cdn.example.com/c.json", None).unwrap();

        assert_eq!(second.name, "cdn.example.com-2");
        assert_eq!(third.name, "cdn.example.com-3");
    }

    #[test]
    fn test_remove_by_name_or_url() {
        let dir = tempdir().unwrap();
        Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();
        let config = config(dir.path());
        remote_add(RealRuntime, &config, MAIN, Some("main")).unwrap();
        remote_add(RealRuntime, &config, MIRROR, Some("mirror")).unwrap();

        let removed = remote_remove(RealRuntime, &config, "main").unwrap();
        assert_eq!(removed.url, MAIN);
        let removed = remote_remove(RealRuntime, &config, MIRROR).unwrap();
        assert_eq!(removed.name, "mirror");
        assert!(saved_remotes(dir.path()).is_empty());

        let err = remote_remove(RealRuntime, &config, "main").unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_remote_commands_require_workspace() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());

        let err = remote_add(RealRuntime, &config, MAIN, None).unwrap_err();
        assert_eq!(exit_code(&err), 3);
        let err = remote_list(RealRuntime, &config).unwrap_err();
        assert_eq!(exit_code(&err), 3);
    }
}
