use anyhow::Result;
use clap::ValueEnum;
use serde_json::json;

use super::config::Config;
use crate::error::ModError;
use crate::module::{InstalledModule, ModuleName, VersionSpec};
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use crate::workspace::Workspace;

/// Fields `info` can print on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum InfoField {
    Name,
    Version,
    Kind,
    ManifestPath,
    InstallPath,
    #[value(alias = "include_folder")]
    PublicIncludeFolder,
    SchemaFiles,
    Dependencies,
    InstalledAt,
    SourceUrl,
}

/// Look up an installed module and render `field`, or the whole record as
/// JSON when no field is given. Only the workspace index is consulted.
#[tracing::instrument(skip(runtime, config))]
pub fn info<R: Runtime>(
    runtime: R,
    config: &Config,
    name: &str,
    spec: &str,
    field: Option<InfoField>,
) -> Result<String> {
    let name: ModuleName = name.parse()?;
    let spec: VersionSpec = spec.parse()?;
    let workspace = Workspace::open(runtime, &config.workspace)?;
    let index = workspace.load_index()?;

    let version = Resolver::new(&index, None).resolve(&name, &spec)?;
    let module = index
        .find(&name, &VersionSpec::Exact(version))
        .ok_or_else(|| ModError::NotFound {
            name: name.clone(),
            spec,
            available_majors: Vec::new(),
        })?;

    match field {
        Some(field) => render_field(module, field),
        None => render_record(module),
    }
}

pub fn render_field(module: &InstalledModule, field: InfoField) -> Result<String> {
    let manifest = &module.manifest;
    let text = match field {
        InfoField::Name => manifest.name.to_string(),
        InfoField::Version => manifest.version.to_string(),
        InfoField::Kind => manifest.kind.to_string(),
        InfoField::ManifestPath => module.manifest_path().display().to_string(),
        InfoField::InstallPath => module.install_path.display().to_string(),
        InfoField::PublicIncludeFolder => module
            .public_include_folder()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        InfoField::SchemaFiles => serde_json::to_string(&module.schema_files())?,
        InfoField::Dependencies => serde_json::to_string(&manifest.dependencies)?,
        InfoField::InstalledAt => module.installed_at.to_rfc3339(),
        InfoField::SourceUrl => module
            .source
            .as_ref()
            .map(|source| source.url.clone())
            .unwrap_or_default(),
    };
    Ok(text)
}

pub fn render_record(module: &InstalledModule) -> Result<String> {
    let manifest = &module.manifest;
    let record = json!({
        "name": manifest.name,
        "version": manifest.version,
        "kind": manifest.kind,
        "display_name": manifest.display_name,
        "description": manifest.description,
        "install_path": module.install_path,
        "manifest_path": module.manifest_path(),
        "public_include_folder": module.public_include_folder(),
        "schema_files": module.schema_files(),
        "dependencies": manifest.dependencies,
        "installed_at": module.installed_at,
        "source": module.source,
    });
    Ok(serde_json::to_string_pretty(&record)?)
}
