// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Run throttling.
//!
//! The mirror is usually invoked periodically by a scheduler. Once a few runs
//! in a row have seen the exact same archive, there is little point in asking
//! the remote every single time. Instead, the mirror only checks again at
//! fixed __checkpoints__ of the unchanged run counter, which spreads out the
//! requests more and more the longer the remote project stays quiet.

use crate::config::RunState;

use tracing::debug;

/// Number of unchanged runs that are always allowed to check the remote.
pub const GRACE_RUNS: u32 = 3;

/// Unchanged run counts past the grace period at which the remote is checked
/// anyway.
pub const CHECKPOINTS: [u32; 14] = [
    6, 12, 18, 24, 36, 48, 144, 288, 432, 576, 720, 1008, 2016, 4032,
];

/// Determine if current run should be skipped without contacting the remote.
pub fn should_skip(state: &RunState) -> bool {
    let count = state.consecutive_unchanged_runs;
    let skip = count > GRACE_RUNS && !CHECKPOINTS.contains(&count);
    debug!("unchanged runs {count}, skip {skip}");
    skip
}

impl RunState {
    /// Record a run that did not apply anything new.
    pub fn record_unchanged(&mut self) {
        self.consecutive_unchanged_runs = self.consecutive_unchanged_runs.saturating_add(1);
    }

    /// Record a run that observed a new archive fingerprint.
    pub fn record_change(&mut self, fingerprint: impl Into<String>) {
        self.consecutive_unchanged_runs = 0;
        self.last_content_fingerprint = Some(fingerprint.into());
    }
}
