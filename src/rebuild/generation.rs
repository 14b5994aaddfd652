// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! System generation metadata.
//!
//! After a successful rebuild, the builder's generation listing is read back
//! to describe the newly active generation in the commit message. Two
//! listing layouts are understood:
//!
//! - __JSON__: array of objects as printed by `list-generations --json`.
//! - __Table__: plain columns where the active row reads
//!   `<id> current <date> <time> <nixos-version> <kernel> ...`.

use serde::Deserialize;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Metadata of a system generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Generation number.
    pub id: u64,

    /// Full NixOS version, e.g., `24.05.20240302.a00c0d7`.
    pub nixos_version: String,

    /// Kernel version, e.g., `6.6.19`.
    pub kernel_version: String,
}

impl Generation {
    /// Select currently active generation from a generation listing.
    ///
    /// # Errors
    ///
    /// - Return [`GenerationError::Json`] if JSON listing is malformed.
    /// - Return [`GenerationError::Malformed`] if active table row lacks
    ///   columns.
    /// - Return [`GenerationError::NoCurrent`] if no generation is active.
    pub fn current_from_listing(listing: &str) -> Result<Self> {
        if listing.trim_start().starts_with('[') {
            Self::current_from_json(listing)
        } else {
            Self::current_from_table(listing)
        }
    }

    fn current_from_json(listing: &str) -> Result<Self> {
        let entries: Vec<JsonEntry> = serde_json::from_str(listing)?;
        entries
            .into_iter()
            .find(|entry| entry.current)
            .map(|entry| Self {
                id: entry.generation,
                nixos_version: entry.nixos_version,
                kernel_version: entry.kernel_version,
            })
            .ok_or(GenerationError::NoCurrent)
    }

    fn current_from_table(listing: &str) -> Result<Self> {
        let row = listing
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>())
            .find(|columns| columns.get(1) == Some(&"current"))
            .ok_or(GenerationError::NoCurrent)?;

        let malformed = || GenerationError::Malformed(row.join(" "));
        let id = row[0].parse().map_err(|_| malformed())?;
        let nixos_version = row.get(4).ok_or_else(malformed)?.to_string();
        let kernel_version = row.get(5).ok_or_else(malformed)?.to_string();

        Ok(Self {
            id,
            nixos_version,
            kernel_version,
        })
    }

    /// Major and minor component of NixOS version, e.g., `24.05`.
    pub fn os_major_minor(&self) -> String {
        self.nixos_version
            .split('.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Commit message describing generation.
    pub fn commit_message(&self) -> String {
        self.to_string()
    }
}

impl Display for Generation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "Gen: {} NixOS: {} Kernel: {}",
            self.id,
            self.os_major_minor(),
            self.kernel_version
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonEntry {
    generation: u64,
    nixos_version: String,
    kernel_version: String,
    #[serde(default)]
    current: bool,
}

/// Generation listing error types.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// JSON listing cannot be parsed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Active generation row lacks expected columns.
    #[error("malformed generation entry {0:?}")]
    Malformed(String),

    /// No generation is marked as active.
    #[error("no current generation in listing")]
    NoCurrent,
}

/// Friendly result alias :3
type Result<T, E = GenerationError> = std::result::Result<T, E>;
