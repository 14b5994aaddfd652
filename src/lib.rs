// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rebuild workflow for a NixOS configuration kept in Git.
//!
//! Detect changes, format, rebuild, check the build log, and record the new
//! generation as a commit. Everything heavy is done by external tools; this
//! crate only sequences them and decides what happens when one fails.
//!
//! The public API is organised into these layers:
//!
//! - __[`config`]__: settings layout and external command lines.
//! - __[`options`]__: command-line flags of a single run.
//! - __[`vcs`]__: Git access to the configuration repository.
//! - __[`process`]__: running external programs, with or without logging.
//! - __[`notify`]__: best-effort desktop notifications.
//! - __[`rebuild`]__: the orchestrator tying it all together.
//! - __[`path`]__: default locations and scoped working directory.

pub mod config;
pub mod notify;
pub mod options;
pub mod path;
pub mod process;
pub mod rebuild;
pub mod vcs;
