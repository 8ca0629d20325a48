// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reconciliation of the working directory against an archive.
//!
//! Reconciliation brings the working directory in line with a freshly
//! downloaded archive:
//!
//! 1. Local files that the archive does not list, and that no protection rule
//!    covers, are __deletion candidates__. They are removed, or merely
//!    reported when deletion was not requested.
//! 2. Files listed by the archive that already exist are made writable, so
//!    extraction can overwrite them.
//! 3. The archive is extracted over the working directory.
//! 4. Every listed file is made read-only, because the mirror is not the
//!    place to edit them, and staged in the enclosing git repository.
//!
//! Staging failures are logged and skipped. Any other failure aborts the
//! reconciliation, possibly leaving a partially applied working directory
//! behind. Running the mirror again repairs it.

use crate::{
    mirror::{
        archive::{Archive, ArchiveError, Manifest},
        rules::IgnoreRules,
    },
    path::relative_entry_name,
};

use git2::Repository;
use std::{
    fs::{metadata, remove_file, set_permissions},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

/// What to do with deletion candidates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Remove deletion candidates from disk.
    Remove,

    /// Only report deletion candidates.
    #[default]
    ReportOnly,
}

impl From<bool> for DeleteMode {
    fn from(force: bool) -> Self {
        if force {
            Self::Remove
        } else {
            Self::ReportOnly
        }
    }
}

/// Outcome of a reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// Deletion candidates that were removed.
    pub removed: Vec<String>,

    /// Deletion candidates that were left alone.
    pub should_delete: Vec<String>,

    /// Files written by extraction.
    pub extracted: Vec<String>,
}

/// Record paths with the version control tool.
pub trait Stager {
    /// Stage path inside of the working directory.
    fn stage(&self, path: &Path) -> Result<(), StageError>;
}

impl<S> Stager for Option<S>
where
    S: Stager,
{
    fn stage(&self, path: &Path) -> Result<(), StageError> {
        match self {
            Some(stager) => stager.stage(path),
            None => Ok(()),
        }
    }
}

impl<S> Stager for &S
where
    S: Stager + ?Sized,
{
    fn stage(&self, path: &Path) -> Result<(), StageError> {
        (**self).stage(path)
    }
}

/// Stage paths through libgit2.
pub struct Git2Stager {
    repository: Repository,
}

impl Git2Stager {
    /// Construct new stager for repository enclosing target directory.
    ///
    /// # Errors
    ///
    /// - Return [`StageError::Git2`] if no repository encloses the directory.
    /// - Return [`StageError::Bare`] if the enclosing repository is bare.
    pub fn discover(directory: impl AsRef<Path>) -> Result<Self, StageError> {
        let repository = Repository::discover(directory.as_ref())?;
        if repository.is_bare() {
            return Err(StageError::Bare(repository.path().to_path_buf()));
        }
        debug!("stage into repository {:?}", repository.path().display());

        Ok(Self { repository })
    }
}

impl Stager for Git2Stager {
    fn stage(&self, path: &Path) -> Result<(), StageError> {
        let workdir = self
            .repository
            .workdir()
            .ok_or_else(|| StageError::Bare(self.repository.path().to_path_buf()))?
            .canonicalize()?;
        let path = path.canonicalize()?;
        let relative = path
            .strip_prefix(&workdir)
            .map_err(|_| StageError::OutsideRepository(path.clone()))?;

        if self.repository.is_path_ignored(relative)? {
            debug!("{:?} is ignored by the repository, not staging", relative.display());
            return Ok(());
        }

        let mut index = self.repository.index()?;
        index.add_path(relative)?;
        index.write()?;
        debug!("git add {:?}", relative.display());

        Ok(())
    }
}

/// Apply archives to a working directory.
pub struct Reconciler<'a, S>
where
    S: Stager,
{
    work_dir: &'a Path,
    rules: &'a IgnoreRules,
    delete: DeleteMode,
    stager: S,
}

impl<'a, S> Reconciler<'a, S>
where
    S: Stager,
{
    /// Construct new reconciler.
    pub fn new(work_dir: &'a Path, rules: &'a IgnoreRules, delete: DeleteMode, stager: S) -> Self {
        Self {
            work_dir,
            rules,
            delete,
            stager,
        }
    }

    /// List local files that are neither protected nor in the manifest.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Walk`] if working directory cannot be
    ///   traversed.
    pub fn deletion_candidates(&self, manifest: &Manifest) -> Result<Vec<String>> {
        let mut candidates = Vec::new();
        let walker = WalkDir::new(self.work_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_top_level_git_dir(entry));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = relative_entry_name(self.work_dir, entry.path()) else {
                continue;
            };

            if !self.rules.is_protected(&name) && !manifest.contains(&name) {
                candidates.push(name);
            }
        }

        Ok(candidates)
    }

    /// Reconcile working directory with archive.
    ///
    /// Consumes the archive, and removes its temporary file afterwards.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Archive`] if archive cannot be read or
    ///   extracted.
    /// - Return [`ReconcileError::Walk`] if working directory cannot be
    ///   traversed.
    /// - Return [`ReconcileError::Remove`] or [`ReconcileError::Permissions`]
    ///   if local files cannot be modified.
    #[instrument(skip(self, archive), level = "debug")]
    pub fn reconcile(&self, mut archive: Archive) -> Result<Report> {
        let manifest = archive.manifest()?;
        info!("archive lists {} files", manifest.len());

        let mut report = Report::default();
        for name in self.deletion_candidates(&manifest)? {
            self.handle_candidate(name, &mut report)?;
        }

        // INVARIANT: Extraction must be able to overwrite existing files.
        for path in manifest.paths_in(self.work_dir) {
            if path.is_file() {
                set_writable(&path, true)?;
            }
        }

        archive.extract(self.work_dir)?;

        for (name, path) in manifest.iter().zip(manifest.paths_in(self.work_dir)) {
            set_writable(&path, false)?;
            if let Err(error) = self.stager.stage(&path) {
                warn!("failed to stage {name:?}: {error}");
            }
            report.extracted.push(name.to_owned());
        }

        archive.close()?;

        Ok(report)
    }

    fn handle_candidate(&self, name: String, report: &mut Report) -> Result<()> {
        let path = self.work_dir.join(&name);
        match self.delete {
            DeleteMode::Remove => {
                remove_file(&path).map_err(|err| ReconcileError::Remove {
                    source: err,
                    path: path.clone(),
                })?;
                info!("{name}: This file was removed");
                report.removed.push(name);
            }
            DeleteMode::ReportOnly => {
                info!("{name}: This file should be deleted");
                report.should_delete.push(name);
            }
        }

        Ok(())
    }
}

fn is_top_level_git_dir(entry: &DirEntry) -> bool {
    entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == ".git"
}

/// Grant or revoke write permission of a file.
///
/// On Unix only the write bits change, read and execute bits are kept.
fn set_writable(path: &Path, writable: bool) -> Result<()> {
    let map_err = |err| ReconcileError::Permissions {
        source: err,
        path: path.to_path_buf(),
    };

    let mut permissions = metadata(path).map_err(map_err)?.permissions();
    apply_writable(&mut permissions, writable);
    set_permissions(path, permissions).map_err(map_err)
}

#[cfg(unix)]
fn apply_writable(permissions: &mut std::fs::Permissions, writable: bool) {
    use std::os::unix::fs::PermissionsExt;

    let mode = permissions.mode();
    let mode = if writable { mode | 0o200 } else { mode & !0o222 };
    permissions.set_mode(mode);
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn apply_writable(permissions: &mut std::fs::Permissions, writable: bool) {
    permissions.set_readonly(!writable);
}

/// Staging error types.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Repository has no work tree to stage from.
    #[error("repository at {:?} is bare", .0.display())]
    Bare(PathBuf),

    /// Path is not located in the repository work tree.
    #[error("{:?} is outside of the repository", .0.display())]
    OutsideRepository(PathBuf),

    /// Path cannot be resolved.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Archive cannot be read or extracted.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Working directory cannot be traversed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// Deletion candidate cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File permissions cannot be changed.
    #[error("failed to change permissions of {:?}", path.display())]
    Permissions {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = ReconcileError> = std::result::Result<T, E>;
