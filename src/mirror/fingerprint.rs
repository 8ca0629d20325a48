// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive change detection.
//!
//! The remote packs a fresh archive for every download, so the bytes of the
//! archive file itself differ between downloads even when the project did
//! not change. The __fingerprint__ therefore covers the decompressed content
//! of every entry instead. Entries are fed in their listed order into one
//! running SHA3-256 digest.

use crate::config::RunState;

use sha3::{Digest, Sha3_256};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::{Read, Seek},
};
use tracing::{debug, info, instrument};
use zip::ZipArchive;

const CHUNK_SIZE: usize = 4096;

/// Content fingerprint of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Treat fingerprint as lowercase hex string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Fingerprint {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

/// Compute content fingerprint over all entries of an archive.
///
/// # Errors
///
/// - Return [`FingerprintError::Zip`] if an entry cannot be opened.
/// - Return [`FingerprintError::Io`] if an entry cannot be read.
#[instrument(skip(archive), level = "debug")]
pub fn fingerprint<R>(archive: &mut ZipArchive<R>) -> Result<Fingerprint>
where
    R: Read + Seek,
{
    let mut hasher = Sha3_256::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        debug!("hash entry {:?}", entry.name());
        consume(&mut hasher, &mut entry)?;
    }

    let fingerprint = Fingerprint(hex::encode(hasher.finalize()));
    info!("archive fingerprint {fingerprint}");

    Ok(fingerprint)
}

/// Determine if fingerprint differs from the one applied by the last run.
pub fn has_changed(fingerprint: &Fingerprint, state: &RunState) -> bool {
    state.last_content_fingerprint.as_deref() != Some(fingerprint.as_str())
}

fn consume(hasher: &mut Sha3_256, reader: &mut impl Read) -> Result<()> {
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..count]);
    }
}

/// Fingerprint error types.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Archive entry cannot be opened.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// Archive entry cannot be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
type Result<T, E = FingerprintError> = std::result::Result<T, E>;
