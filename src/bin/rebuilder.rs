// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use rebuilder::{
    config::{CommandLine, Settings},
    notify::DesktopNotifier,
    options::RunOptions,
    path::{default_settings_path, WorkDir},
    process::SystemRunner,
    rebuild::{Orchestrator, RunReport},
    vcs::Git2Vcs,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fs, io::ErrorKind, path::PathBuf, process::exit};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rebuild NixOS from a Git tracked configuration, and commit the result.
#[derive(Debug, Clone, Parser)]
#[command(about, override_usage = "rebuilder [options]", version)]
struct Cli {
    #[command(flatten)]
    pub options: RunOptions,

    /// Path to settings file.
    #[arg(long, value_name = "path")]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    // INVARIANT: Usage errors exit with 1 like every other fatal condition.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = if error.use_stderr() { 1 } else { 0 };
            let _ = error.print();
            exit(code);
        }
    };

    if let Err(error) = run(cli).await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.config)?;
    let _workdir = WorkDir::enter(&settings.repository)?;
    let vcs = Git2Vcs::open(&settings.repository)?;
    let notifier = DesktopNotifier::new(settings.commands.notify.clone());
    let orchestrator = Orchestrator::new(settings, vcs, SystemRunner::new(), notifier);

    match orchestrator.run(&cli.options).await? {
        RunReport::Unchanged => info!("nothing to rebuild"),
        RunReport::Pushed => info!("pushed without rebuilding"),
        RunReport::Rebuilt { generation, commit } => match commit {
            Some(commit) => info!("rebuilt {generation} as commit {commit}"),
            None => info!("rebuilt {generation}, nothing to commit"),
        },
    }

    Ok(())
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let explicit = path.is_some();
    let path = match path {
        Some(path) => path,
        None => default_settings_path()?,
    };

    let mut settings = match fs::read_to_string(&path) {
        Ok(data) => data
            .parse::<Settings>()
            .with_context(|| format!("failed to parse settings {:?}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound && !explicit => {
            debug!("no settings at {:?}, using defaults", path.display());
            Settings::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read settings {:?}", path.display()))
        }
    };

    if settings.editor.is_none() {
        let line = env::var("VISUAL")
            .or_else(|_| env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".into());
        settings.editor = CommandLine::from_words(line).ok();
    }

    Ok(settings)
}
