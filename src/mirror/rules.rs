// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Protection rules for local-only files.
//!
//! The working directory usually holds more than the mirrored project: build
//! artifacts, the git directory, notes that never went to the remote. Such
//! files must survive a reconciliation even though the archive does not list
//! them. The user declares them through __protection rules__.
//!
//! # Rule Sources
//!
//! Rules are gathered from, in order:
//!
//! 1. The `.gitignore` file at the top-level of the working directory.
//! 2. Built-in rules for the git directory and the run state file.
//! 3. The file name of the sync configuration.
//! 4. An optional allow-list file: its own file name, and each of its lines.
//!
//! Blank lines and lines starting with `#` are skipped in both files.
//!
//! # Matching
//!
//! Rules are shell-style globs (`*`, `?`, `[...]`) matched against the path
//! relative to the working directory, with `/` as separator. Unlike gitignore
//! semantics, `*` also matches across `/`, a leading dot is not special, and
//! there is no negation. A path is protected if it matches _any_ rule, so the
//! order of rules never changes the outcome.
//!
//! Rules never fail to compile. A `[` without a closing `]` stands for
//! itself, and a run of `*` is a single wildcard, so `draft*[` protects
//! `draft-x[`.

use crate::path::{REPO_IGNORE_FILE_NAME, STATE_FILE_NAME};

use glob::Pattern;
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, trace, warn};

/// Rules that are always in effect.
pub const BUILTIN_RULES: [&str; 3] = [".git/*", ".git*", STATE_FILE_NAME];

/// Compiled set of protection rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    /// Construct new rule set from raw rule sources.
    ///
    /// Takes the lines of the repository ignore file, the name of the sync
    /// configuration file, and the file name plus lines of an allow-list.
    pub fn new<'a>(
        repo_ignore: impl IntoIterator<Item = &'a str>,
        config_file_name: impl AsRef<str>,
        allow_list: Option<(&str, &str)>,
    ) -> Self {
        let mut rules = IgnoreRules::default();
        rules.extend(meaningful_lines(repo_ignore));
        rules.extend(BUILTIN_RULES);
        rules.push(config_file_name.as_ref());

        if let Some((name, content)) = allow_list {
            rules.push(name);
            rules.extend(meaningful_lines(content.lines()));
        }

        rules
    }

    /// Construct rule set for a working directory.
    ///
    /// Reads `.gitignore` at the top-level of the working directory if it
    /// exists, and the allow-list if one is given.
    ///
    /// # Errors
    ///
    /// - Return [`RulesError::ReadAllowList`] if allow-list cannot be read.
    /// - Return [`RulesError::ReadRepoIgnore`] if an existing repository
    ///   ignore file cannot be read.
    #[instrument(skip(work_dir, allow_list, config_file_name), level = "debug")]
    pub fn from_work_dir(
        work_dir: impl AsRef<Path>,
        allow_list: Option<&Path>,
        config_file_name: impl AsRef<str>,
    ) -> Result<Self> {
        let repo_ignore_path = work_dir.as_ref().join(REPO_IGNORE_FILE_NAME);
        let repo_ignore = if repo_ignore_path.is_file() {
            read_to_string(&repo_ignore_path).map_err(|err| RulesError::ReadRepoIgnore {
                source: err,
                path: repo_ignore_path.clone(),
            })?
        } else {
            debug!("no repository ignore file at {:?}", repo_ignore_path.display());
            String::new()
        };

        let allow_list = match allow_list {
            Some(path) => {
                let content = read_to_string(path).map_err(|err| RulesError::ReadAllowList {
                    source: err,
                    path: path.to_path_buf(),
                })?;
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Some((name, content))
            }
            None => None,
        };

        let rules = Self::new(
            repo_ignore.lines(),
            config_file_name,
            allow_list
                .as_ref()
                .map(|(name, content)| (name.as_str(), content.as_str())),
        );
        debug!("compiled {} protection rules", rules.len());

        Ok(rules)
    }

    /// Check if relative path is protected by any rule.
    pub fn is_protected(&self, relative_path: impl AsRef<str>) -> bool {
        let path = relative_path.as_ref().replace('\\', "/");
        let path = path.trim_start_matches('/');
        match self.patterns.iter().find(|pattern| pattern.matches(path)) {
            Some(pattern) => {
                trace!("{path:?} protected by {:?}", pattern.as_str());
                true
            }
            None => false,
        }
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check if rule set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn push(&mut self, rule: &str) {
        let pattern = Pattern::new(&shell_glob(rule)).unwrap_or_else(|err| {
            warn!("rule {rule:?} is not a valid glob ({err}), matching it literally");
            // INVARIANT: Escaped text always compiles.
            Pattern::new(&Pattern::escape(rule)).unwrap_or_default()
        });
        self.patterns.push(pattern);
    }

    fn extend<'a>(&mut self, rules: impl IntoIterator<Item = &'a str>) {
        for rule in rules {
            self.push(rule);
        }
    }
}

/// Rewrite shell-style rule into an equivalent [`Pattern`] source.
fn shell_glob(rule: &str) -> String {
    let chars: Vec<char> = rule.chars().collect();
    let mut glob = String::with_capacity(rule.len());
    let mut index = 0;
    while index < chars.len() {
        match chars[index] {
            '*' => {
                glob.push('*');
                while chars.get(index + 1) == Some(&'*') {
                    index += 1;
                }
            }
            '[' => match class_end(&chars, index) {
                Some(end) => {
                    glob.extend(&chars[index..=end]);
                    index = end;
                }
                None => glob.push_str("[[]"),
            },
            other => glob.push(other),
        }
        index += 1;
    }

    glob
}

/// Find closing bracket of character class opened at `start`.
///
/// A `!` right after the opening bracket negates the class, and a `]` right
/// after that belongs to the class.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut index = start + 1;
    if chars.get(index) == Some(&'!') {
        index += 1;
    }
    if chars.get(index) == Some(&']') {
        index += 1;
    }
    (index..chars.len()).find(|&index| chars[index] == ']')
}

fn meaningful_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> impl Iterator<Item = &'a str> {
    lines
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Protection rule error types.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    /// Allow-list file cannot be read.
    #[error("failed to read allow-list at {:?}", path.display())]
    ReadAllowList {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Repository ignore file cannot be read.
    #[error("failed to read repository ignore file at {:?}", path.display())]
    ReadRepoIgnore {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = RulesError> = std::result::Result<T, E>;
