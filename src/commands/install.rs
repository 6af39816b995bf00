use anyhow::Result;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::services::{build_catalog_source, build_extractor, build_http_client};
use crate::catalog::{Catalog, CatalogClient, CatalogSource};
use crate::error::{ModError, is_cancelled, kind_of};
use crate::installer::{DEFAULT_JOBS, Installer};
use crate::module::{InstalledModule, ModuleName, VersionSpec};
use crate::resolver::{MajorFallback, ResolutionPlan, Resolver};
use crate::runtime::Runtime;
use crate::workspace::{Index, Workspace};

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub jobs: Option<usize>,
    pub fallback: MajorFallback,
}

/// Resolve `name spec` with its dependencies and install whatever is missing.
/// Returns the records of the whole closure, dependencies first.
#[tracing::instrument(skip(runtime, config, cancel))]
pub async fn install<R: Runtime + 'static>(
    runtime: R,
    config: &Config,
    name: &str,
    spec: &str,
    options: InstallOptions,
    cancel: CancellationToken,
) -> Result<Vec<InstalledModule>> {
    let name: ModuleName = name.parse()?;
    let spec: VersionSpec = spec.parse()?;
    let workspace = Workspace::open(runtime, &config.workspace)?;
    let http = build_http_client()?;

    let remotes = config.remotes(workspace.config());
    let client = CatalogClient::new(&workspace, build_catalog_source(&http, &cancel), remotes);

    println!("   resolving {} {}", name, spec);
    let index = workspace.load_index()?;
    let (catalog, plan) = plan_install(&client, &index, &name, &spec, options.fallback).await?;
    info!(
        "Plan: {}",
        plan.keys()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let jobs = options
        .jobs
        .or(workspace.config().jobs)
        .unwrap_or(DEFAULT_JOBS);
    let installer = Installer::new(&workspace, &catalog, http, build_extractor(), cancel)
        .with_jobs(jobs);
    let installed = installer.ensure_installed(&plan).await?;

    if let Some(root) = installed.last() {
        println!("       ready {} {}", root.key(), root.install_path.display());
    }
    Ok(installed)
}

/// Resolve against the cached catalog, refreshing it once if the cache does
/// not know the requested version. Without any catalog, modules that are
/// already installed still resolve; if something is missing locally the
/// catalog failure is reported, any other resolution error as itself.
pub(crate) async fn plan_install<R: Runtime, S: CatalogSource>(
    client: &CatalogClient<'_, R, S>,
    index: &Index,
    name: &ModuleName,
    spec: &VersionSpec,
    fallback: MajorFallback,
) -> Result<(Catalog, ResolutionPlan)> {
    let from_cache = client.cached().is_some();
    let catalog = match client.get(true).await {
        Ok(catalog) => catalog,
        Err(e) if is_cancelled(&e) => return Err(e),
        Err(e) => {
            let local = Resolver::new(index, None)
                .with_fallback(fallback)
                .resolve_closure(name, spec);
            return match local {
                Ok(plan) => {
                    warn!("Catalog unavailable; using installed modules only");
                    Ok((Catalog::new(), plan))
                }
                Err(missing) if matches!(kind_of(&missing), Some(ModError::NotFound { .. })) => {
                    Err(e)
                }
                Err(other) => Err(other),
            };
        }
    };

    let result = Resolver::new(index, Some(&catalog))
        .with_fallback(fallback)
        .resolve_closure(name, spec);
    match result {
        Err(e) if from_cache && matches!(kind_of(&e), Some(ModError::NotFound { .. })) => {
            info!("{:#}; refreshing the catalog", e);
            let catalog = client.get(false).await?;
            let plan = Resolver::new(index, Some(&catalog))
                .with_fallback(fallback)
                .resolve_closure(name, spec)?;
            Ok((catalog, plan))
        }
        result => result.map(|plan| (catalog, plan)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogRelease, MockCatalogSource, Remote};
    use crate::module::{ModuleKind, Version};
    use crate::resolver::PlanNode;
    use crate::runtime::RealRuntime;
    use crate::workspace::WorkspaceConfig;
    use tempfile::tempdir;

    const URL: &str = "https://catalog.example.com/index.json";

    fn remotes() -> Vec<Remote> {
        vec![Remote::new("default", URL)]
    }

    fn unreachable_source() -> MockCatalogSource {
        let mut source = MockCatalogSource::new();
        source.expect_fetch().returning(|url| {
            Err(ModError::Network {
                url: url.to_string(),
                attempts: 3,
                message: "connection refused".into(),
            }
            .into())
        });
        source
    }

    fn catalog(versions: &[&str]) -> Catalog {
        let mut catalog = Catalog::new();
        for version in versions {
            catalog.insert(
                "foo".parse().unwrap(),
                CatalogRelease {
                    version: version.parse().unwrap(),
                    url: format!("https://catalog.example.com/foo-{}.zip", version),
                    sha256: "00".into(),
                    kind: ModuleKind::Plugin { api_version: None },
                    dependencies: vec![],
                },
            );
        }
        catalog
    }

    fn root_version(plan: &ResolutionPlan) -> Version {
        plan.root().unwrap().version
    }

    #[tokio::test]
    async fn test_stale_cache_is_refreshed_for_unknown_version() {
        let dir = tempdir().unwrap();
        let ws = Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();

        let mut seed = MockCatalogSource::new();
        seed.expect_fetch().returning(|_| Ok(catalog(&["1.0.0"])));
        CatalogClient::new(&ws, seed, remotes()).fetch().await.unwrap();

        let mut source = MockCatalogSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(catalog(&["1.0.0", "2.0.0"])));
        let client = CatalogClient::new(&ws, source, remotes());

        let (catalog, plan) = plan_install(
            &client,
            &Index::new(),
            &"foo".parse().unwrap(),
            &"2.0".parse().unwrap(),
            MajorFallback::Deny,
        )
        .await
        .unwrap();
        assert_eq!(root_version(&plan), Version::new(2, 0, 0));
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn test_cached_catalog_is_used_without_fetching() {
        let dir = tempdir().unwrap();
        let ws = Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();

        let mut seed = MockCatalogSource::new();
        seed.expect_fetch().returning(|_| Ok(catalog(&["1.0.0", "1.1.0"])));
        CatalogClient::new(&ws, seed, remotes()).fetch().await.unwrap();

        let mut source = MockCatalogSource::new();
        source.expect_fetch().times(0);
        let client = CatalogClient::new(&ws, source, remotes());

        let (_, plan) = plan_install(
            &client,
            &Index::new(),
            &"foo".parse().unwrap(),
            &"1.0".parse().unwrap(),
            MajorFallback::Deny,
        )
        .await
        .unwrap();
        assert_eq!(root_version(&plan), Version::new(1, 0, 0));
    }

    #[tokio::test]
    async fn test_installed_modules_resolve_without_catalog() {
        let dir = tempdir().unwrap();
        let ws = Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();
        let mut index = Index::new();
        index.upsert(crate::resolver::test_support::installed("foo", "1.3.0", &[]));

        let client = CatalogClient::new(&ws, unreachable_source(), remotes());

        let (catalog, plan) = plan_install(
            &client,
            &index,
            &"foo".parse().unwrap(),
            &"1.0".parse().unwrap(),
            MajorFallback::Deny,
        )
        .await
        .unwrap();
        assert!(catalog.is_empty());
        assert_eq!(
            plan.nodes(),
            &[PlanNode {
                key: plan.root().unwrap().clone(),
                dependencies: vec![],
            }]
        );
        assert_eq!(root_version(&plan), Version::new(1, 3, 0));

        // Not installed and no catalog: the network error is what the user sees
        let err = plan_install(
            &client,
            &index,
            &"bar".parse().unwrap(),
            &"1.0".parse().unwrap(),
            MajorFallback::Deny,
        )
        .await
        .unwrap_err();
        assert_eq!(crate::error::exit_code(&err), 8);
    }

    #[tokio::test]
    async fn test_offline_conflict_is_not_reported_as_network_error() {
        let dir = tempdir().unwrap();
        let ws = Workspace::init(RealRuntime, dir.path(), WorkspaceConfig::default()).unwrap();
        let mut index = Index::new();
        index.upsert(crate::resolver::test_support::installed("a", "1.0.0", &[("b", "1.0")]));
        index.upsert(crate::resolver::test_support::installed("b", "1.0.0", &[("a", "1.0")]));
        let client = CatalogClient::new(&ws, unreachable_source(), remotes());

        let err = plan_install(
            &client,
            &index,
            &"a".parse().unwrap(),
            &"1.0".parse().unwrap(),
            MajorFallback::Deny,
        )
        .await
        .unwrap_err();

        assert!(matches!(kind_of(&err), Some(ModError::CycleDetected { .. })));
        assert_eq!(crate::error::exit_code(&err), 7);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_before_anything_else() {
        let dir = tempdir().unwrap();
        let config = Config {
            workspace: dir.path().to_path_buf(),
            catalog_url: Some(URL.into()),
            update_url: None,
            user: Default::default(),
        };

        let err = install(
            RealRuntime,
            &config,
            "foo",
            "1",
            InstallOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(crate::error::exit_code(&err), 2);
        assert!(err.to_string().contains("minor"));
    }
}
