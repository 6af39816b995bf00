mod tar_gz;
mod zip;

use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use log::debug;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

/// Trait for format-specific archive extractors
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor: Send + Sync {
    /// Check if this extractor can handle the given archive format
    fn can_handle(&self, archive_path: &Path) -> bool;

    /// Extract the archive into `extract_to`, which must already exist.
    /// A single top-level directory in the archive is flattened away.
    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()>;
}

/// Dispatcher that selects the appropriate extractor based on archive format.
pub struct ArchiveExtractorImpl {
    tar_gz: TarGzExtractor,
    zip: ZipExtractor,
}

impl Default for ArchiveExtractorImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveExtractorImpl {
    pub fn new() -> Self {
        Self {
            tar_gz: TarGzExtractor,
            zip: ZipExtractor,
        }
    }
}

impl ArchiveExtractor for ArchiveExtractorImpl {
    fn can_handle(&self, archive_path: &Path) -> bool {
        self.tar_gz.can_handle(archive_path) || self.zip.can_handle(archive_path)
    }

    #[tracing::instrument(skip(self, runtime, archive_path, extract_to))]
    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        if self.tar_gz.can_handle(archive_path) {
            return self.tar_gz.extract(runtime, archive_path, extract_to);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.extract(runtime, archive_path, extract_to);
        }
        Err(anyhow!(
            "Unsupported archive format: {}",
            archive_path.display()
        ))
    }
}

/// Scratch directory next to `extract_to` that entries are unpacked into first.
fn temp_extract_dir<R: Runtime + ?Sized>(runtime: &R, extract_to: &Path) -> Result<PathBuf> {
    let name = extract_to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extract".to_string());
    let temp_extract_dir = extract_to.with_file_name(format!("{}_temp_extract", name));
    if runtime.exists(&temp_extract_dir) {
        runtime.remove_dir_all(&temp_extract_dir)?;
    }
    runtime.create_dir_all(&temp_extract_dir)?;
    Ok(temp_extract_dir)
}

/// Entry path made relative and free of `..`, or `None` if it would land outside the target.
fn enclosed_path(path: &Path) -> Option<PathBuf> {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => result.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if result.as_os_str().is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Write one regular file below `root`, creating its parent directories.
/// `mode` is applied on unix only; failing to apply it is not an error.
fn unpack_file<R: Runtime + ?Sized>(
    runtime: &R,
    root: &Path,
    entry_path: &Path,
    contents: &mut dyn Read,
    mode: Option<u32>,
) -> Result<()> {
    let full_path = root.join(entry_path);
    if let Some(parent) = full_path.parent() {
        runtime.create_dir_all(parent)?;
    }
    let mut dest = runtime.create_file(&full_path)?;
    std::io::copy(contents, &mut dest)
        .with_context(|| format!("Failed to extract {:?}", entry_path))?;
    drop(dest);

    #[cfg(unix)]
    if let Some(mode) = mode
        && let Err(e) = runtime.set_permissions(&full_path, mode & 0o777)
    {
        debug!("Failed to set permissions on {:?}: {}", full_path, e);
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

/// Move the unpacked tree from `temp_extract_dir` into `extract_to`, stripping a
/// single top-level directory if that is all the archive contained.
fn flatten_into<R: Runtime + ?Sized>(
    runtime: &R,
    temp_extract_dir: &Path,
    extract_to: &Path,
) -> Result<()> {
    let entries = runtime
        .read_dir(temp_extract_dir)
        .context("Failed to read temp extraction directory")?;

    let Some(first) = entries.first() else {
        runtime.remove_dir_all(temp_extract_dir)?;
        return Err(anyhow!("Archive appears to be empty."));
    };

    let source_dir = if entries.len() == 1 && runtime.is_dir(first) {
        first.clone()
    } else {
        temp_extract_dir.to_path_buf()
    };

    debug!("Moving contents from {:?} to {:?}", source_dir, extract_to);
    for item in runtime.read_dir(&source_dir)? {
        let Some(file_name) = item.file_name() else {
            continue;
        };
        runtime.rename(&item, &extract_to.join(file_name))?;
    }

    runtime.remove_dir_all(temp_extract_dir)?;
    Ok(())
}
