// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, and scope the working directory of the current process
//! to the configuration repository.

use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Determine default absolute path to settings file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/rebuilder/config.toml` as
/// the default. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if configuration directory cannot be
///   determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("rebuilder").join("config.toml"))
        .ok_or(PathError::NoWayHome)
}

/// Scoped working directory.
///
/// Enters a directory on construction, and restores the previous working
/// directory when dropped. Restoration happens on every exit path, including
/// early returns through `?` and unwinding.
#[derive(Debug)]
pub struct WorkDir {
    previous: PathBuf,
}

impl WorkDir {
    /// Enter target directory.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::CurrentDir`] if current working directory
    ///   cannot be determined.
    /// - Return [`PathError::Enter`] if target directory cannot be entered.
    pub fn enter(path: impl AsRef<Path>) -> Result<Self> {
        let previous = env::current_dir().map_err(PathError::CurrentDir)?;
        env::set_current_dir(path.as_ref()).map_err(|err| PathError::Enter {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;
        debug!("entered {:?}", path.as_ref().display());

        Ok(Self { previous })
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(error) = env::set_current_dir(&self.previous) {
            debug!(
                "cannot restore working directory {:?}: {error}",
                self.previous.display()
            );
        }
    }
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's configuration directory.
    ///
    /// # See Also
    ///
    /// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
    #[error("cannot determine absolute path to user's configuration directory")]
    NoWayHome,

    /// Current working directory cannot be determined.
    #[error("cannot determine current working directory")]
    CurrentDir(#[source] std::io::Error),

    /// Target directory cannot be entered.
    #[error("cannot enter directory {:?}", path.display())]
    Enter {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
