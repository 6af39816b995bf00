//! Replaces the running executable with the latest published build.
//!
//! The release channel is a JSON document:
//!
//! ```json
//! { "version": "1.4.0",
//!   "assets": [ { "target": "x86_64-unknown-linux-gnu", "url": "...", "sha256": "..." } ] }
//! ```
//!
//! Never touches a workspace.

use anyhow::{Context, Result, anyhow, bail};
use goblin::Object;
use log::{debug, info};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::cleanup::CleanupGuard;
use crate::download::{checksum_matches, download_file, sha256_file};
use crate::error::{ModError, is_cancelled};
use crate::http::HttpClient;
use crate::module::Version;
use crate::runtime::Runtime;

/// Target triple this binary was built for.
pub const BUILD_TARGET: &str = env!("MODMAN_TARGET");

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseChannel {
    pub version: Version,
    #[serde(default)]
    pub assets: Vec<ChannelAsset>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChannelAsset {
    pub target: String,
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate {
        current: Version,
    },
    Updated {
        from: Version,
        to: Version,
        path: PathBuf,
    },
}

/// Where and what to update.
pub struct UpdateRequest<'a> {
    pub channel_url: &'a str,
    pub current: Version,
    pub target: &'a str,
    pub executable: &'a Path,
}

/// Update `request.executable` from the channel. Any failure other than
/// cancellation is reported as [`ModError::SelfUpdate`].
#[tracing::instrument(skip(runtime, http, request, cancel))]
pub async fn self_update<R: Runtime + ?Sized>(
    runtime: &R,
    http: &HttpClient,
    request: &UpdateRequest<'_>,
    cancel: &CancellationToken,
) -> Result<UpdateOutcome> {
    run(runtime, http, request, cancel).await.map_err(|e| {
        if is_cancelled(&e) {
            e
        } else {
            ModError::SelfUpdate {
                message: format!("{:#}", e),
            }
            .into()
        }
    })
}

async fn run<R: Runtime + ?Sized>(
    runtime: &R,
    http: &HttpClient,
    request: &UpdateRequest<'_>,
    cancel: &CancellationToken,
) -> Result<UpdateOutcome> {
    let channel: ReleaseChannel = http
        .get_json(request.channel_url, cancel)
        .await
        .context("Failed to fetch the release channel")?;

    if channel.version <= request.current {
        info!(
            "Running {}, latest published is {}",
            request.current, channel.version
        );
        return Ok(UpdateOutcome::UpToDate {
            current: request.current,
        });
    }

    let asset = channel
        .assets
        .iter()
        .find(|asset| asset.target == request.target)
        .ok_or_else(|| {
            anyhow!(
                "Release {} has no build for {}",
                channel.version,
                request.target
            )
        })?;

    let exe = request.executable;
    let exe_name = exe
        .file_name()
        .ok_or_else(|| anyhow!("{:?} is not a file path", exe))?
        .to_string_lossy()
        .into_owned();
    let download = exe.with_file_name(format!(".{}.download", exe_name));
    let _guard = CleanupGuard::new(runtime, download.clone());

    println!(" downloading modman {}", channel.version);
    download_file(runtime, &asset.url, &download, http, cancel).await?;

    let actual = sha256_file(runtime, &download)?;
    if !checksum_matches(&asset.sha256, &actual) {
        bail!(
            "checksum mismatch for {}: expected {}, got {}",
            asset.url,
            asset.sha256,
            actual
        );
    }
    verify_native_executable(runtime, &download)?;
    runtime
        .set_permissions(&download, 0o755)
        .with_context(|| format!("Failed to mark {:?} executable", download))?;

    if cancel.is_cancelled() {
        return Err(ModError::Cancelled.into());
    }
    replace_executable(runtime, &download, exe, &exe_name)?;

    println!("    updated modman {} -> {}", request.current, channel.version);
    Ok(UpdateOutcome::Updated {
        from: request.current,
        to: channel.version,
        path: exe.to_path_buf(),
    })
}

fn verify_native_executable<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    runtime
        .open(path)?
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read {:?}", path))?;

    let found = match Object::parse(&bytes).context("Downloaded file is not an executable")? {
        Object::Elf(_) => "ELF",
        Object::Mach(_) => "Mach-O",
        Object::PE(_) => "PE",
        _ => "unrecognized",
    };
    let expected = if cfg!(windows) {
        "PE"
    } else if cfg!(target_vendor = "apple") {
        "Mach-O"
    } else {
        "ELF"
    };
    if found != expected {
        bail!(
            "Downloaded file is a {} binary, expected {}",
            found,
            expected
        );
    }
    debug!("{:?} is a {} executable", path, found);
    Ok(())
}

fn replace_executable<R: Runtime + ?Sized>(
    runtime: &R,
    download: &Path,
    exe: &Path,
    exe_name: &str,
) -> Result<()> {
    // A running executable cannot be overwritten on Windows, but it can be renamed
    if cfg!(windows) {
        let old = exe.with_file_name(format!(".{}.old", exe_name));
        if runtime.exists(&old) {
            runtime.remove_file(&old)?;
        }
        runtime
            .rename(exe, &old)
            .with_context(|| format!("Failed to move {:?} aside", exe))?;
    }
    runtime
        .rename(download, exe)
        .with_context(|| format!("Failed to replace {:?}", exe))
}
