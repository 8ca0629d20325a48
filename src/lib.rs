// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror remote collaborative LaTeX projects into a local git repository.
//!
//! Sharemirror logs into a ShareLaTeX/Overleaf style instance, downloads the
//! archive of a project, and keeps a local working directory in sync with it.
//! Files that only exist locally can be protected through gitignore rules or
//! an allow-list. Mirrored files are made read-only and staged in git, so the
//! history of the remote project can be tracked with regular git commits.
//!
//! See [`mirror`] for how a run works.

pub mod config;
pub mod credential;
pub mod mirror;
pub mod path;
pub mod remote;

pub use config::{RunState, SyncConfig};
pub use credential::{KeyringStore, MemorySecretStore, SecretStore};
pub use mirror::{
    reconcile::{DeleteMode, Git2Stager, Report, Stager},
    FailureKind, Mirror, MirrorError, SyncOutcome, SyncSettings,
};
