use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::{debug, info};
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use super::{ArchiveExtractor, enclosed_path, flatten_into, temp_extract_dir, unpack_file};

/// Extractor for .zip module archives.
pub struct ZipExtractor;

impl ZipExtractor {
    /// `ZipArchive` needs `Seek`, which runtime readers do not offer, so the
    /// whole archive is buffered. Module archives are small.
    fn load<R: Runtime + ?Sized>(
        runtime: &R,
        archive_path: &Path,
    ) -> Result<ZipArchive<Cursor<Vec<u8>>>> {
        let mut buffer = Vec::new();
        runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;
        ZipArchive::new(Cursor::new(buffer))
            .with_context(|| format!("{:?} is not a valid zip archive", archive_path))
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        archive_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    }

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting zip archive to {:?}...", extract_to);
        let mut archive = Self::load(runtime, archive_path)?;
        let scratch = temp_extract_dir(runtime, extract_to)?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read zip entry {}", i))?;

            let Some(entry_path) = enclosed_path(Path::new(entry.name())) else {
                debug!("Skipping entry with unsafe path {:?}", entry.name());
                continue;
            };

            if entry.is_dir() {
                runtime.create_dir_all(&scratch.join(&entry_path))?;
            } else if entry.is_symlink() {
                debug!("Skipping symlink entry {:?}", entry_path);
            } else {
                let mode = entry.unix_mode();
                unpack_file(runtime, &scratch, &entry_path, &mut entry, mode)?;
            }
        }

        flatten_into(runtime, &scratch, extract_to)?;
        info!("Extracted {} zip entries", archive.len());
        Ok(())
    }
}
