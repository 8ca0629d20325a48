// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the files that the mirror reads and writes to
//! simplify the process of serialization and deserialization.
//!
//! # Sync Configuration
//!
//! The user describes which remote project to mirror through a small JSON
//! object. It names the project, the identity to log in with, and optionally
//! the base URL of the remote instance:
//!
//! ```json
//! {"project_id": "5f1d...", "username": "jdoe", "sharelatex_url": "https://x/"}
//! ```
//!
//! # Run State
//!
//! Every run leaves a tiny JSON file behind in the working directory. It
//! remembers the fingerprint of the last archive that was applied, and how
//! many runs in a row saw that same fingerprint. The key names are kept
//! stable so that state files written by older versions still load.

use crate::path::state_file;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Remote base URL used when the sync configuration does not name one.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://sharelatex.tum.de/";

/// Sync configuration layout.
///
/// Identifies which remote project to mirror and under what identity.
/// Created once per invocation and never mutated afterwards.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Identifier of the remote project.
    pub project_id: String,

    /// Login name on the remote instance.
    pub username: String,

    /// Base URL of the remote instance.
    #[serde(rename = "sharelatex_url", default = "default_remote_base_url")]
    pub remote_base_url: String,
}

impl SyncConfig {
    /// Load sync configuration from target file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not a valid sync
    ///   configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("load sync configuration {:?}", path.display());
        read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            })?
            .parse()
    }
}

impl FromStr for SyncConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(data).map_err(ConfigError::Deserialize)
    }
}

fn default_remote_base_url() -> String {
    DEFAULT_REMOTE_BASE_URL.into()
}

/// Run state layout.
///
/// Persisted across invocations at a well-known path inside the working
/// directory. Owned exclusively by one invocation at a time.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RunState {
    /// Number of consecutive runs that observed no change.
    #[serde(rename = "tries_with_same_hash")]
    pub consecutive_unchanged_runs: u32,

    /// Fingerprint of the last archive that was applied.
    #[serde(rename = "old_hash")]
    pub last_content_fingerprint: Option<String>,
}

impl RunState {
    /// Load run state of working directory.
    ///
    /// Falls back to a fresh state if no state file exists yet.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if existing state file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if state file is malformed.
    pub fn load(work_dir: impl AsRef<Path>) -> Result<Self> {
        let path = state_file(work_dir);
        if !path.is_file() {
            debug!("no run state at {:?}, starting fresh", path.display());
            return Ok(Self::default());
        }

        read_to_string(&path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.clone(),
            })?
            .parse()
    }

    /// Write run state into working directory.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if state file cannot be written.
    pub fn store(&self, work_dir: impl AsRef<Path>) -> Result<()> {
        let path = state_file(work_dir);
        debug!("store run state {self:?} at {:?}", path.display());
        write(&path, self.to_string()).map_err(|err| ConfigError::Write { source: err, path })
    }
}

impl FromStr for RunState {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for RunState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_json::to_string(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration file cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error("malformed configuration: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// Failed to serialize configuration.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
