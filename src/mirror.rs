// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Incremental mirror of a remote project.
//!
//! A __mirror__ keeps a local working directory in line with the archive of a
//! remote project. Each run goes through the same steps:
//!
//! 1. Consult the [`throttle`] to decide if the remote should be asked at
//!    all.
//! 2. Log in and download the archive through a
//!    [`RemoteSession`](crate::remote::RemoteSession).
//! 3. Compare the [`fingerprint`] of the archive with the one applied by the
//!    previous run.
//! 4. If it changed, [`reconcile`] the working directory with the archive,
//!    leaving everything covered by the protection [`rules`] alone.
//!
//! The run state is written back exactly once at the end of a run that was
//! skipped, saw no change, or applied a change. Failed runs leave it as it
//! was, so the next run tries again.
//!
//! # Concurrency
//!
//! Runs are strictly sequential and block the calling thread. At most one
//! run may operate on a given working directory at any time. Nothing guards
//! against concurrent runs.

pub mod archive;
pub mod fingerprint;
pub mod reconcile;
pub mod rules;
pub mod throttle;

use crate::{
    config::{ConfigError, RunState, SyncConfig},
    credential::{CredentialError, SecretStore},
    mirror::{
        archive::{Archive, ArchiveError},
        fingerprint::{has_changed, Fingerprint},
        reconcile::{DeleteMode, ReconcileError, Reconciler, Report, Stager},
        rules::{IgnoreRules, RulesError},
    },
    remote::{RemoteError, RemoteSession},
};

use std::path::PathBuf;
use tracing::{info, instrument};

/// Settings of a single mirror run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Remote project to mirror.
    pub config: SyncConfig,

    /// File name of the sync configuration, protected from deletion.
    pub config_file_name: String,

    /// Directory to mirror into.
    pub work_dir: PathBuf,

    /// Optional file listing additional protection rules.
    pub allow_list: Option<PathBuf>,

    /// What to do with deletion candidates.
    pub delete: DeleteMode,

    /// Directory for the temporary archive, system default if unset.
    pub download_dir: Option<PathBuf>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Run was skipped by the throttle without contacting the remote.
    Skipped {
        /// Unchanged run counter after this run.
        unchanged_runs: u32,
    },

    /// Archive matched the one applied before.
    Unchanged {
        /// Fingerprint shared by both archives.
        fingerprint: Fingerprint,
    },

    /// Archive was applied to the working directory.
    Synced {
        /// Fingerprint of the applied archive.
        fingerprint: Fingerprint,

        /// What the reconciliation did.
        report: Report,
    },
}

/// Mirror of a remote project.
#[derive(Debug)]
pub struct Mirror<S, G>
where
    S: SecretStore,
    G: Stager,
{
    settings: SyncSettings,
    secrets: S,
    stager: G,
}

impl<S, G> Mirror<S, G>
where
    S: SecretStore,
    G: Stager,
{
    /// Construct new mirror.
    pub fn new(settings: SyncSettings, secrets: S, stager: G) -> Self {
        Self {
            settings,
            secrets,
            stager,
        }
    }

    /// Settings of this mirror.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Perform one run.
    ///
    /// # Errors
    ///
    /// - Return [`MirrorError::State`] if run state cannot be loaded or
    ///   stored.
    /// - Return [`MirrorError::Rules`] if protection rules cannot be read.
    /// - Return [`MirrorError::Secret`] if the secret store fails.
    /// - Return [`MirrorError::Remote`] if login or download fails.
    /// - Return [`MirrorError::Archive`] if archive cannot be read.
    /// - Return [`MirrorError::Reconcile`] if working directory cannot be
    ///   updated.
    #[instrument(skip(self), fields(project = %self.settings.config.project_id), level = "debug")]
    pub fn run(&self) -> Result<SyncOutcome> {
        let work_dir = self.settings.work_dir.as_path();
        let mut state = RunState::load(work_dir).map_err(MirrorError::State)?;

        if throttle::should_skip(&state) {
            state.record_unchanged();
            state.store(work_dir).map_err(MirrorError::State)?;
            info!("skip run {} to avoid hammering the remote", state.consecutive_unchanged_runs);
            return Ok(SyncOutcome::Skipped {
                unchanged_runs: state.consecutive_unchanged_runs,
            });
        }

        let rules = IgnoreRules::from_work_dir(
            work_dir,
            self.settings.allow_list.as_deref(),
            &self.settings.config_file_name,
        )?;

        let config = &self.settings.config;
        let secret = self.secrets.get(&config.username)?;

        let mut session = RemoteSession::new(&config.remote_base_url)?;
        if let Some(directory) = &self.settings.download_dir {
            session = session.with_download_dir(directory);
        }
        let file = session.fetch_archive(&config.project_id, &config.username, secret.as_deref())?;
        let mut archive = Archive::open(file)?;

        let fingerprint = archive.fingerprint()?;
        if !has_changed(&fingerprint, &state) {
            state.record_unchanged();
            state.store(work_dir).map_err(MirrorError::State)?;
            archive.close()?;
            info!("same fingerprint {fingerprint} as last run, no new changes");
            return Ok(SyncOutcome::Unchanged { fingerprint });
        }

        state.record_change(fingerprint.clone());
        let report =
            Reconciler::new(work_dir, &rules, self.settings.delete, &self.stager).reconcile(archive)?;
        state.store(work_dir).map_err(MirrorError::State)?;
        info!("applied archive {fingerprint}");

        Ok(SyncOutcome::Synced {
            fingerprint,
            report,
        })
    }
}

/// Failure categories of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Missing or unreadable credential, missing login token, or rejected
    /// login.
    Auth,

    /// Remote unreachable or archive download refused.
    Network,

    /// Malformed input, or missing allow-list.
    Config,

    /// Local files cannot be read or changed.
    Io,
}

/// Mirror error types.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Run state cannot be loaded or stored.
    #[error(transparent)]
    State(ConfigError),

    /// Protection rules cannot be read.
    #[error(transparent)]
    Rules(#[from] RulesError),

    /// Secret store cannot be queried.
    #[error(transparent)]
    Secret(#[from] CredentialError),

    /// Login or download fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Archive cannot be read.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Working directory cannot be updated.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl MirrorError {
    /// Categorize error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::State(ConfigError::Deserialize(_)) | Self::Rules(_) => FailureKind::Config,
            Self::State(_) | Self::Reconcile(_) => FailureKind::Io,
            Self::Secret(_) => FailureKind::Auth,
            Self::Remote(error) if error.is_auth_failure() => FailureKind::Auth,
            Self::Remote(RemoteError::Io(_)) => FailureKind::Io,
            Self::Remote(_) => FailureKind::Network,
            Self::Archive(_) => FailureKind::Network,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = MirrorError> = std::result::Result<T, E>;
