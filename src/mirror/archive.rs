// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Downloaded project archive.
//!
//! The archive lives in a temporary file that belongs to the current run
//! alone. The file is deleted once the [`Archive`] is dropped or closed, no
//! matter which way the run ends.

use crate::{
    mirror::fingerprint::{self, Fingerprint, FingerprintError},
    path::relative_entry_name,
};

use std::{
    collections::BTreeSet,
    fs::File,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};
use zip::ZipArchive;

/// Project archive backed by a temporary file.
#[derive(Debug)]
pub struct Archive {
    file: NamedTempFile,
    zip: ZipArchive<File>,
}

impl Archive {
    /// Open archive stored in temporary file.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Io`] if temporary file cannot be reopened.
    /// - Return [`ArchiveError::Zip`] if file is not a valid ZIP archive.
    pub fn open(file: NamedTempFile) -> Result<Self> {
        let zip = ZipArchive::new(file.reopen()?)?;
        debug!("opened archive {:?} with {} entries", file.path().display(), zip.len());

        Ok(Self { file, zip })
    }

    /// Path to temporary archive file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Compute content fingerprint of archive.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Fingerprint`] if an entry cannot be read.
    pub fn fingerprint(&mut self) -> Result<Fingerprint> {
        Ok(fingerprint::fingerprint(&mut self.zip)?)
    }

    /// List file entries of archive.
    ///
    /// Directory entries are left out. Entry names are normalized the same
    /// way local paths are, so both can be compared directly.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Zip`] if an entry cannot be read.
    /// - Return [`ArchiveError::UnsafeEntry`] if an entry would land outside
    ///   of the extraction directory.
    pub fn manifest(&mut self) -> Result<Manifest> {
        let mut files = BTreeSet::new();
        for index in 0..self.zip.len() {
            let entry = self.zip.by_index_raw(index)?;
            let enclosed = entry
                .enclosed_name()
                .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_owned()))?;
            if entry.is_dir() {
                continue;
            }

            let name = relative_entry_name("", &enclosed)
                .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_owned()))?;
            debug!("file in archive: {name}");
            files.insert(name);
        }

        Ok(Manifest { files })
    }

    /// Extract all entries over target directory.
    ///
    /// Existing files are overwritten, so they must be writable.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Zip`] if extraction fails.
    #[instrument(skip(self, directory), level = "debug")]
    pub fn extract(&mut self, directory: impl AsRef<Path>) -> Result<()> {
        info!("extract archive into {:?}", directory.as_ref().display());
        Ok(self.zip.extract(directory.as_ref())?)
    }

    /// Delete temporary archive file.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Io`] if temporary file cannot be removed.
    pub fn close(self) -> Result<()> {
        let Self { file, zip } = self;
        drop(zip);
        debug!("remove temporary archive {:?}", file.path().display());
        Ok(file.close()?)
    }
}

/// File entries of an archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Manifest {
    files: BTreeSet<String>,
}

impl Manifest {
    /// Check if manifest lists relative path.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.files.contains(name.as_ref())
    }

    /// Iterate over listed relative paths in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    /// Resolve listed relative paths against target directory.
    pub fn paths_in(&self, directory: impl AsRef<Path>) -> Vec<PathBuf> {
        self.iter()
            .map(|name| directory.as_ref().join(name))
            .collect()
    }

    /// Number of listed files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if manifest lists no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Archive error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Archive cannot be parsed or extracted.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// Archive content cannot be hashed.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// Archive entry points outside of extraction directory.
    #[error("archive entry {0:?} escapes the working directory")]
    UnsafeEntry(String),

    /// Temporary archive file cannot be accessed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod fixture {
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;
    use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

    /// Pack entries into a temporary ZIP file. Names ending in `/` become
    /// directory entries.
    pub(crate) fn zip_file(entries: &[(&str, &str)]) -> anyhow::Result<NamedTempFile> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options)?;
            } else {
                writer.start_file(*name, options)?;
                writer.write_all(contents.as_bytes())?;
            }
        }

        let mut file = NamedTempFile::new()?;
        file.write_all(&writer.finish()?.into_inner())?;
        file.flush()?;

        Ok(file)
    }
}
