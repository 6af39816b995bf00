use crate::runtime::Runtime;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::path::Path;
use tar::{Archive, EntryType};

use super::{ArchiveExtractor, enclosed_path, flatten_into, temp_extract_dir, unpack_file};

/// Extractor for .tar.gz / .tgz archives
pub struct TarGzExtractor;

impl ArchiveExtractor for TarGzExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting tar.gz archive to {:?}...", extract_to);
        let reader = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
        let mut archive = Archive::new(GzDecoder::new(reader));

        let temp_extract_dir = temp_extract_dir(runtime, extract_to)?;
        debug!("Unpacking to temp dir: {:?}", temp_extract_dir);

        let entries = archive
            .entries()
            .with_context(|| "Failed to read tar.gz archive")?;

        for entry in entries {
            let mut entry = entry.with_context(|| "Failed to read tar entry")?;
            let raw_path = entry
                .path()
                .with_context(|| "Tar entry has an unreadable path")?
                .into_owned();

            let Some(entry_path) = enclosed_path(&raw_path) else {
                debug!("Skipping entry with unsafe path {:?}", raw_path);
                continue;
            };

            match entry.header().entry_type() {
                EntryType::Directory => {
                    runtime.create_dir_all(&temp_extract_dir.join(&entry_path))?;
                }
                EntryType::Regular | EntryType::Continuous => {
                    let mode = entry.header().mode().ok();
                    unpack_file(runtime, &temp_extract_dir, &entry_path, &mut entry, mode)?;
                }
                other => {
                    debug!("Skipping unsupported tar entry {:?} ({:?})", raw_path, other);
                }
            }
        }

        flatten_into(runtime, &temp_extract_dir, extract_to)?;

        info!("Extraction complete.");
        Ok(())
    }
}
