// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command-line options of a rebuild run.

use clap::Args;
use std::path::{Path, PathBuf};

/// Flags controlling a single rebuild run.
///
/// # Invariant
///
/// - Boot-only mode and pushing are mutually exclusive. Parsing fails with a
///   usage error before anything else happens.
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Open file in editor before rebuilding [default: main configuration].
    #[arg(short, long, value_name = "FILE", num_args = 0..=1)]
    pub edit: Option<Option<PathBuf>>,

    /// Stage new configuration for next boot instead of switching to it.
    #[arg(short, long, conflicts_with = "push")]
    pub boot: bool,

    /// Refresh pinned dependency versions before checking for changes.
    #[arg(short, long)]
    pub update: bool,

    /// Push to remote after a successful rebuild.
    #[arg(short, long)]
    pub push: bool,

    /// Rebuild even if nothing changed.
    #[arg(short, long)]
    pub force: bool,

    /// Cap parallel build jobs.
    #[arg(short, long)]
    pub limited: bool,

    /// Collect garbage and refresh boot entries after a successful rebuild.
    #[arg(short, long)]
    pub clean: bool,
}

impl RunOptions {
    /// Check if edit mode was requested.
    pub fn edit_mode(&self) -> bool {
        self.edit.is_some()
    }

    /// Explicit edit target, if one was given with the edit flag.
    pub fn edit_target(&self) -> Option<&Path> {
        self.edit.as_ref().and_then(|target| target.as_deref())
    }
}
