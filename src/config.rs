// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file that rebuilder uses to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! Everything the rebuild workflow needs from its environment lives here:
//! where the configuration repository is, which editor to open, which files
//! are tracked, and the exact command lines of every external tool. The
//! library never consults process-wide state for any of it.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Rebuild settings layout.
///
/// # General Layout
///
/// Top-level keys describe the configuration repository. The `commands`
/// table lists the argument vector of every external tool invoked during a
/// rebuild. Every key is optional, missing keys take their default value.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the configuration repository.
    pub repository: PathBuf,

    /// Main configuration file, relative to repository root.
    pub entry_point: PathBuf,

    /// Editor to open for edit mode.
    pub editor: Option<CommandLine>,

    /// Pathspecs of declarative configuration files.
    pub config_patterns: Vec<String>,

    /// Pathspec of pinned dependency lock file.
    pub lock_file: String,

    /// Directory to write rebuild logs into, relative to repository root.
    pub log_dir: PathBuf,

    /// Job cap applied in limited mode.
    pub limited_jobs: u32,

    /// Name of remote to push to.
    pub remote: String,

    /// External command lines.
    pub commands: Commands,
}

impl Settings {
    /// Resolve path relative to repository root.
    ///
    /// Absolute paths are returned untouched.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        if path.as_ref().is_absolute() {
            path.as_ref().to_path_buf()
        } else {
            self.repository.join(path)
        }
    }

    /// Absolute path to a log file inside the log directory.
    pub fn log_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.resolve(&self.log_dir).join(name)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository: PathBuf::from("/etc/nixos"),
            entry_point: PathBuf::from("configuration.nix"),
            editor: None,
            config_patterns: vec!["*.nix".into()],
            lock_file: "npins/sources.json".into(),
            log_dir: PathBuf::from("."),
            limited_jobs: 2,
            remote: "origin".into(),
            commands: Commands::default(),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.repository = expand_path(&settings.repository)?;
        settings.entry_point = expand_path(&settings.entry_point)?;
        settings.log_dir = expand_path(&settings.log_dir)?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Command lines of external tools.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Commands {
    /// Formatter, receives tracked configuration files as arguments.
    pub formatter: CommandLine,

    /// Refresh pinned dependency versions.
    pub pin_update: CommandLine,

    /// Evaluate store path of pinned nixpkgs.
    pub pin_path: CommandLine,

    /// System rebuild, receives action and include paths as arguments.
    pub rebuild: CommandLine,

    /// List system generations.
    pub generations: CommandLine,

    /// Collect garbage.
    pub garbage_collect: CommandLine,

    /// Refresh boot entries.
    pub boot_refresh: CommandLine,

    /// Desktop notification, receives summary and body as arguments.
    pub notify: CommandLine,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            formatter: CommandLine::new("nixfmt"),
            pin_update: CommandLine::new("npins").with_args(["update"]),
            pin_path: CommandLine::new("nix-instantiate").with_args([
                "--eval",
                "npins",
                "-A",
                "nixpkgs.outPath",
            ]),
            rebuild: CommandLine::new("sudo").with_args(["nixos-rebuild"]),
            generations: CommandLine::new("nixos-rebuild")
                .with_args(["list-generations", "--json"]),
            garbage_collect: CommandLine::new("sudo").with_args([
                "nix-collect-garbage",
                "--delete-older-than",
                "7d",
            ]),
            boot_refresh: CommandLine::new("sudo")
                .with_args(["/run/current-system/bin/switch-to-configuration", "boot"]),
            notify: CommandLine::new("notify-send").with_args(["--app-name=rebuilder"]),
        }
    }
}

/// Argument vector of an external tool.
///
/// # Invariant
///
/// - Always names a program, i.e., never empty.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Construct new command line from program name.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append fixed arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Split shell-like command string on whitespace.
    ///
    /// Meant for editor variables like `$EDITOR="code --wait"`. Quoting is
    /// not interpreted.
    ///
    /// # Errors
    ///
    /// - Return [`EmptyCommandLine`] if string holds no words.
    pub fn from_words(line: impl AsRef<str>) -> Result<Self, EmptyCommandLine> {
        Self::try_from(
            line.as_ref()
                .split_whitespace()
                .map(str::to_owned)
                .collect::<Vec<_>>(),
        )
    }

    /// Program to execute.
    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    /// Fixed arguments given to program.
    pub fn args(&self) -> &[String] {
        self.args.as_slice()
    }
}

impl TryFrom<Vec<String>> for CommandLine {
    type Error = EmptyCommandLine;

    fn try_from(mut words: Vec<String>) -> Result<Self, Self::Error> {
        if words.is_empty() {
            return Err(EmptyCommandLine);
        }

        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }
}

impl From<CommandLine> for Vec<String> {
    fn from(command: CommandLine) -> Self {
        let mut words = vec![command.program];
        words.extend(command.args);
        words
    }
}

impl Display for CommandLine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.program)?;
        for arg in &self.args {
            write!(fmt, " {arg}")?;
        }

        Ok(())
    }
}

/// Command line names no program.
#[derive(Clone, Debug, thiserror::Error)]
#[error("command line must name a program")]
pub struct EmptyCommandLine;

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
