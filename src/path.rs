// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for files that the mirror needs to
//! interact with, and normalize paths so that local files can be compared
//! against archive entry names.

use std::path::{Component, Path, PathBuf};

/// Name of the persisted run state file inside the working directory.
pub const STATE_FILE_NAME: &str = ".sharemirror.json";

/// Name of the repository ignore file at the top-level of the working
/// directory.
pub const REPO_IGNORE_FILE_NAME: &str = ".gitignore";

/// Determine absolute path to the run state file of a working directory.
///
/// Does not check if the path returned actually exists.
pub fn state_file(work_dir: impl AsRef<Path>) -> PathBuf {
    work_dir.as_ref().join(STATE_FILE_NAME)
}

/// Join URL segments with exactly one slash between each of them.
///
/// Leading and trailing slashes of every segment are dropped before joining,
/// so `["https://x/", "/ldap/login"]` becomes `https://x/ldap/login`.
pub fn join_url(parts: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    parts
        .into_iter()
        .map(|part| part.as_ref().trim_matches('/').to_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Express path relative to working directory in archive entry form.
///
/// Strips the working directory prefix, and joins the remaining normal
/// components with `/` regardless of the host path separator. Returns
/// [`None`] if the path is not located inside the working directory.
pub fn relative_entry_name(work_dir: impl AsRef<Path>, path: impl AsRef<Path>) -> Option<String> {
    let relative = path.as_ref().strip_prefix(work_dir.as_ref()).ok()?;
    let name = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
