//! Artifact downloads and checksum computation.

use crate::error::ModError;
use crate::http::HttpClient;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::info;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Downloads a URL to `dest`, creating the file through the runtime.
#[tracing::instrument(skip(runtime, dest, http_client, cancel))]
pub async fn download_file<R: Runtime + ?Sized>(
    runtime: &R,
    url: &str,
    dest: &Path,
    http_client: &HttpClient,
    cancel: &CancellationToken,
) -> Result<u64> {
    info!("Downloading {}...", url);

    let bytes = http_client
        .download_file(
            url,
            || {
                runtime
                    .create_file(dest)
                    .map_err(|e| ModError::io("create", dest, e).into())
            },
            cancel,
        )
        .await?;

    info!("Download of {} complete.", url);
    Ok(bytes)
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<String> {
    let mut reader = runtime
        .open(path)
        .with_context(|| format!("Failed to open {:?} for hashing", path))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to hash {:?}", path))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Case-insensitive comparison of two hex digests.
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
