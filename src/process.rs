// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process execution.
//!
//! Every external tool of the rebuild workflow runs through a [`Runner`].
//! Processes run in one of three ways:
//!
//! - __Interactive__: inherit the terminal, e.g., the editor or formatter.
//! - __Captured__: collect stdout and stderr for parsing.
//! - __Logged__: show output live on the terminal while also writing it into
//!   a log file that is overwritten on every run.
//!
//! Each call blocks the workflow until the process exits. There are no
//! timeouts.

use crate::config::CommandLine;

use std::{
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    io::{IsTerminal, Write},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::Command,
    sync::Mutex,
};
use tracing::{debug, warn};

/// Single invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    dir: PathBuf,
}

impl Invocation {
    /// Construct new invocation from command line running inside directory.
    pub fn new(command: &CommandLine, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: command.program().into(),
            args: command.args().iter().map(OsString::from).collect(),
            dir: dir.into(),
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program to execute.
    pub fn program(&self) -> &OsStr {
        self.program.as_os_str()
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(&self.dir);
        command
    }
}

impl Display for Invocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.program.to_string_lossy().as_ref())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// Exit state of a finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit(Option<i32>);

impl Exit {
    /// Process exited with given code.
    pub fn code(code: i32) -> Self {
        Self(Some(code))
    }

    /// Check if process exited successfully.
    pub fn success(&self) -> bool {
        self.0 == Some(0)
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        Self(status.code())
    }
}

impl Display for Exit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self.0 {
            Some(code) => write!(fmt, "exit code {code}"),
            None => fmt.write_str("terminated by signal"),
        }
    }
}

/// Output of a captured process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub exit: Exit,
    pub stdout: String,
    pub stderr: String,
}

/// Way to run external programs.
#[allow(async_fn_in_trait)]
pub trait Runner {
    /// Locate program on `PATH`.
    fn locate(&self, program: &OsStr) -> Option<PathBuf>;

    /// Run program attached to the current terminal.
    async fn interactive(&self, invocation: &Invocation) -> Result<Exit>;

    /// Run program, collecting its output.
    async fn captured(&self, invocation: &Invocation) -> Result<Captured>;

    /// Run program, showing output live while writing it to a log file.
    ///
    /// Log file is truncated first.
    async fn logged(&self, invocation: &Invocation, log: &Path) -> Result<Exit>;
}

/// Runner spawning real processes on the host system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Construct new system runner.
    pub fn new() -> Self {
        Self
    }
}

impl Runner for SystemRunner {
    fn locate(&self, program: &OsStr) -> Option<PathBuf> {
        which::which(program).ok()
    }

    async fn interactive(&self, invocation: &Invocation) -> Result<Exit> {
        debug!("run {invocation}");
        let status = invocation
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|err| ProcessError::spawn(invocation, err))?;

        Ok(status.into())
    }

    async fn captured(&self, invocation: &Invocation) -> Result<Captured> {
        debug!("run {invocation}");
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| ProcessError::spawn(invocation, err))?;

        Ok(Captured {
            exit: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn logged(&self, invocation: &Invocation, log: &Path) -> Result<Exit> {
        debug!("run {invocation}, logging to {:?}", log.display());
        if let Some(parent) = log.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ProcessError::log(log, err))?;
        }
        let file = File::create(log)
            .await
            .map_err(|err| ProcessError::log(log, err))?;
        let sink = Mutex::new(file);

        let mut child = invocation
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProcessError::spawn(invocation, err))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe)?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe)?;

        // INVARIANT: Drain both pipes concurrently so neither can fill up and
        // stall the child.
        let (out, err, status) = tokio::join!(
            tee(stdout, tokio::io::stdout(), &sink),
            tee(stderr, tokio::io::stderr(), &sink),
            child.wait(),
        );
        out.map_err(|err| ProcessError::log(log, err))?;
        err.map_err(|err| ProcessError::log(log, err))?;
        let status = status.map_err(|err| ProcessError::spawn(invocation, err))?;

        sink.lock()
            .await
            .flush()
            .await
            .map_err(|err| ProcessError::log(log, err))?;

        Ok(status.into())
    }
}

/// Copy reader line by line into log sink, echoing to terminal.
///
/// Reader is always drained to the end. Losing the terminal, e.g., stdout
/// piped into a closed reader, only stops the echo.
async fn tee<R, W>(reader: R, terminal: W, sink: &Mutex<File>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut terminal = Some(terminal);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }

        sink.lock().await.write_all(&line).await?;

        let failed = match terminal.as_mut() {
            Some(out) => echo(out, &line).await.err(),
            None => None,
        };
        if let Some(error) = failed {
            warn!("cannot echo output to terminal, logging only: {error}");
            terminal = None;
        }
    }

    Ok(())
}

async fn echo<W>(terminal: &mut W, line: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    terminal.write_all(line).await?;
    terminal.flush().await
}

/// Alternate screen of the terminal.
///
/// Switches to the alternate screen and clears it on construction, and
/// switches back when dropped, restoring the scrollback around the output
/// in between. Does nothing if stdout is not a terminal.
#[derive(Debug)]
pub struct AlternateScreen {
    active: bool,
}

impl AlternateScreen {
    const ENTER: &'static str = "\x1b[?1049h\x1b[H\x1b[2J";
    const LEAVE: &'static str = "\x1b[?1049l";

    /// Enter alternate screen.
    pub fn enter() -> Self {
        let mut stdout = std::io::stdout();
        let active = stdout.is_terminal();
        if active {
            if let Err(error) = stdout
                .write_all(Self::ENTER.as_bytes())
                .and_then(|_| stdout.flush())
            {
                warn!("cannot enter alternate screen: {error}");
            }
        }

        Self { active }
    }
}

impl Drop for AlternateScreen {
    fn drop(&mut self) {
        if !self.active {
            return;
        }

        let mut stdout = std::io::stdout();
        let _ = stdout
            .write_all(Self::LEAVE.as_bytes())
            .and_then(|_| stdout.flush());
    }
}

/// Process execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Program cannot be spawned or waited on.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Log file cannot be written.
    #[error("failed to write log file {:?}", path.display())]
    Log {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Log file cannot be read back.
    #[error("failed to read log file {:?}", path.display())]
    ReadLog {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Child process output pipe was not set up.
    #[error("child process output pipe missing")]
    MissingPipe,
}

impl ProcessError {
    fn spawn(invocation: &Invocation, source: std::io::Error) -> Self {
        Self::Spawn {
            source,
            program: invocation.program().to_string_lossy().into_owned(),
        }
    }

    fn log(path: &Path, source: std::io::Error) -> Self {
        Self::Log {
            source,
            path: path.to_path_buf(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ProcessError> = std::result::Result<T, E>;
