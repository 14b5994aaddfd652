// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rebuild workflow orchestration.
//!
//! A single run is strictly sequential:
//!
//! 1. Optionally refresh pinned dependencies.
//! 2. Optionally open the editor.
//! 3. Detect changes, exiting early if there is nothing to rebuild.
//! 4. Format tracked configuration files.
//! 5. Rebuild the system, capturing output into a log file.
//! 6. Scan the log for failure markers.
//! 7. Commit, then optionally push and clean up.
//! 8. Notify the user.
//!
//! Every fatal condition ends the run through the same path: the user is
//! notified, and the error is handed back to the caller. Nothing is ever
//! retried.
//!
//! # See Also
//!
//! 1. [`change`]
//! 2. [`scan`]
//! 3. [`generation`]

pub mod change;
pub mod generation;
pub mod scan;

use crate::{
    config::{CommandLine, Settings},
    notify::{DesktopNotifier, Notifier, Urgency},
    options::RunOptions,
    process::{AlternateScreen, Exit, Invocation, ProcessError, Runner, SystemRunner},
    rebuild::{
        change::ChangeState,
        generation::{Generation, GenerationError},
        scan::BuildOutcome,
    },
    vcs::{Vcs, VcsError},
};

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Log file of system rebuild.
pub const REBUILD_LOG: &str = "nixos-switch.log";

/// Log file of garbage collection.
pub const GC_LOG: &str = "nixos-gc.log";

/// Log file of boot entry refresh.
pub const BOOT_LOG: &str = "nixos-boot.log";

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Nothing changed, nothing was done.
    Unchanged,

    /// Nothing changed, current branch was pushed.
    Pushed,

    /// System was rebuilt.
    Rebuilt {
        generation: Generation,
        commit: Option<String>,
    },
}

/// Rebuild workflow orchestrator.
///
/// Owns explicit settings together with its collaborators: version control
/// of the configuration repository, a way to run external programs, and a
/// way to notify the user.
#[derive(Debug)]
pub struct Orchestrator<V, R = SystemRunner, N = DesktopNotifier>
where
    V: Vcs,
    R: Runner,
    N: Notifier,
{
    settings: Settings,
    vcs: V,
    runner: R,
    notifier: N,
}

impl<V, R, N> Orchestrator<V, R, N>
where
    V: Vcs,
    R: Runner,
    N: Notifier,
{
    /// Construct new orchestrator.
    pub fn new(settings: Settings, vcs: V, runner: R, notifier: N) -> Self {
        Self {
            settings,
            vcs,
            runner,
            notifier,
        }
    }

    /// Runner in use.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Notifier in use.
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Perform a single rebuild run.
    ///
    /// # Errors
    ///
    /// Every variant of [`RunError`] is fatal. The user is notified of it
    /// before it is returned.
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        match self.execute(options).await {
            Ok(report) => Ok(report),
            Err(error) => {
                self.notifier
                    .notify(Urgency::Critical, "Rebuild failed", &error.to_string());
                Err(error)
            }
        }
    }

    async fn execute(&self, options: &RunOptions) -> Result<RunReport> {
        if options.update {
            self.update_pins().await?;
        }

        if options.edit_mode() {
            self.edit(options.edit_target()).await?;
        }

        let config_changed = self.vcs.has_changes(&self.settings.config_patterns)?;
        let pins_changed = self
            .vcs
            .has_changes(std::slice::from_ref(&self.settings.lock_file))?;

        let state = ChangeState::detect(config_changed, pins_changed, options);
        info!("change state: {state:?}");
        match state {
            ChangeState::NoChangePushOnly => {
                info!("no changes detected, pushing only");
                self.push()?;
                self.notifier.notify(
                    Urgency::Normal,
                    "Configuration pushed",
                    &format!("pushed to {}", self.settings.remote),
                );
                return Ok(RunReport::Pushed);
            }
            state if !state.proceeds() => {
                info!("no changes detected, nothing to do");
                return Ok(RunReport::Unchanged);
            }
            _ => {}
        }

        self.preflight(options)?;

        let outcome = if self.format().await? {
            self.build(options).await?
        } else {
            BuildOutcome::FormatFailure
        };

        let log = self.settings.log_path(REBUILD_LOG);
        match outcome {
            BuildOutcome::Success => {}
            BuildOutcome::FormatFailure => return Err(RunError::Format),
            BuildOutcome::BuildFailure(reason) => return Err(RunError::Build { reason, log }),
            BuildOutcome::Killed => return Err(RunError::Killed { log }),
        }

        let generation = self.current_generation().await?;
        let commit = self.commit(&generation)?;

        if options.push {
            self.push()?;
        }

        if options.clean {
            self.clean().await;
        }

        self.notifier.notify(
            Urgency::Normal,
            "Rebuild succeeded",
            &generation.commit_message(),
        );

        Ok(RunReport::Rebuilt { generation, commit })
    }

    fn invocation(&self, command: &CommandLine) -> Invocation {
        Invocation::new(command, &self.settings.repository)
    }

    async fn update_pins(&self) -> Result<()> {
        info!("refresh pinned dependencies");
        let invocation = self.invocation(&self.settings.commands.pin_update);
        self.require(invocation.program())?;
        let exit = self.runner.interactive(&invocation).await?;
        if !exit.success() {
            return Err(RunError::Update(exit));
        }

        Ok(())
    }

    async fn edit(&self, target: Option<&Path>) -> Result<()> {
        let editor = self.settings.editor.as_ref().ok_or(RunError::NoEditor)?;
        let path = self
            .settings
            .resolve(target.unwrap_or(self.settings.entry_point.as_path()));
        info!("edit {:?}", path.display());

        let invocation = self.invocation(editor).arg(&path);
        self.require(invocation.program())?;
        let exit = self.runner.interactive(&invocation).await?;
        if !exit.success() {
            return Err(RunError::Edit { path, exit });
        }

        Ok(())
    }

    fn require(&self, program: &OsStr) -> Result<()> {
        match self.runner.locate(program) {
            Some(_) => Ok(()),
            None => Err(RunError::MissingTool(program.to_string_lossy().into_owned())),
        }
    }

    fn preflight(&self, options: &RunOptions) -> Result<()> {
        let commands = &self.settings.commands;
        let mut required = vec![
            &commands.formatter,
            &commands.pin_path,
            &commands.rebuild,
            &commands.generations,
        ];
        if options.clean {
            required.push(&commands.garbage_collect);
            required.push(&commands.boot_refresh);
        }

        for command in required {
            self.require(OsStr::new(command.program()))?;
        }

        Ok(())
    }

    /// Format tracked configuration files, true if formatter accepted them.
    async fn format(&self) -> Result<bool> {
        let files = self.vcs.tracked_files(&self.settings.config_patterns)?;

        // INVARIANT: Never run formatter without file arguments, it would
        // read the terminal instead.
        if files.is_empty() {
            info!("no tracked configuration files, skip formatting");
            return Ok(true);
        }

        info!("format {} tracked files", files.len());
        let invocation = self
            .invocation(&self.settings.commands.formatter)
            .args(files);
        let exit = self.runner.interactive(&invocation).await?;
        if !exit.success() {
            warn!("formatter failed with {exit}");
        }

        Ok(exit.success())
    }

    async fn pinned_nixpkgs(&self) -> Result<String> {
        let invocation = self.invocation(&self.settings.commands.pin_path);
        let captured = self.runner.captured(&invocation).await?;
        if !captured.exit.success() {
            return Err(RunError::PinPath(captured.stderr.trim().to_string()));
        }

        let path = captured.stdout.trim().trim_matches('"');
        if path.is_empty() {
            return Err(RunError::PinPath("evaluation printed nothing".into()));
        }

        Ok(path.to_string())
    }

    async fn build(&self, options: &RunOptions) -> Result<BuildOutcome> {
        let nixpkgs = self.pinned_nixpkgs().await?;
        let entry_point = self.settings.resolve(&self.settings.entry_point);
        let action = if options.boot { "boot" } else { "switch" };

        let mut args: Vec<OsString> = vec![
            action.into(),
            "-I".into(),
            format!("nixpkgs={nixpkgs}").into(),
            "-I".into(),
            format!("nixos-config={}", entry_point.display()).into(),
        ];
        if options.limited {
            let jobs = self.settings.limited_jobs.to_string();
            args.extend([
                OsString::from("--max-jobs"),
                OsString::from(&jobs),
                OsString::from("--cores"),
                OsString::from(&jobs),
            ]);
        }

        let invocation = self.invocation(&self.settings.commands.rebuild).args(args);
        let log = self.settings.log_path(REBUILD_LOG);
        info!("{invocation}");

        let exit = {
            let _screen = AlternateScreen::enter();
            self.runner.logged(&invocation, &log).await?
        };

        // INVARIANT: Builder output is not guaranteed to be valid UTF-8.
        let content = tokio::fs::read(&log)
            .await
            .map_err(|err| ProcessError::ReadLog {
                source: err,
                path: log.clone(),
            })?;
        let outcome = BuildOutcome::classify(&String::from_utf8_lossy(&content));
        if outcome.is_success() && !exit.success() {
            warn!("builder reported {exit} without a failure marker in {:?}", log.display());
        }

        Ok(outcome)
    }

    async fn current_generation(&self) -> Result<Generation> {
        let invocation = self.invocation(&self.settings.commands.generations);
        let captured = self.runner.captured(&invocation).await?;
        if !captured.exit.success() {
            warn!("generation listing reported {}", captured.exit);
        }

        Ok(Generation::current_from_listing(&captured.stdout)?)
    }

    fn commit(&self, generation: &Generation) -> Result<Option<String>> {
        let mut pathspecs = vec![self.settings.lock_file.clone()];
        pathspecs.extend(self.settings.config_patterns.iter().cloned());
        self.vcs.stage(&pathspecs)?;

        Ok(self.vcs.commit(&generation.commit_message())?)
    }

    fn push(&self) -> Result<()> {
        self.vcs
            .push(&self.settings.remote)
            .map_err(RunError::Push)
    }

    async fn clean(&self) {
        let commands = &self.settings.commands;
        let steps = [
            ("garbage collection", &commands.garbage_collect, GC_LOG),
            ("boot entry refresh", &commands.boot_refresh, BOOT_LOG),
        ];

        for (name, command, log) in steps {
            let invocation = self.invocation(command);
            let log = self.settings.log_path(log);
            info!("{name}: {invocation}");

            let _screen = AlternateScreen::enter();
            match self.runner.logged(&invocation, &log).await {
                Ok(exit) if exit.success() => {}
                Ok(exit) => warn!("{name} reported {exit}, see {:?}", log.display()),
                Err(error) => warn!("{name} failed: {error}"),
            }
        }
    }
}

/// Rebuild run error types.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Pinned dependency refresh fails.
    #[error("failed to update pinned dependencies ({0})")]
    Update(Exit),

    /// No editor configured for edit mode.
    #[error("no editor configured")]
    NoEditor,

    /// Editor exits unsuccessfully.
    #[error("editor failed on {:?} ({exit})", path.display())]
    Edit { path: PathBuf, exit: Exit },

    /// Required program not on `PATH`.
    #[error("required program {0:?} not found")]
    MissingTool(String),

    /// Formatter rejects configuration.
    #[error("formatting failed")]
    Format,

    /// Pinned nixpkgs path cannot be evaluated.
    #[error("failed to resolve pinned nixpkgs: {0}")]
    PinPath(String),

    /// Build log carries error marker.
    #[error("rebuild failed: {reason} (see {:?})", log.display())]
    Build { reason: String, log: PathBuf },

    /// Build log carries kill marker.
    #[error("rebuild was killed, likely out of memory (see {:?})", log.display())]
    Killed { log: PathBuf },

    /// Push to remote fails after local commit.
    #[error("failed to push to remote")]
    Push(#[source] VcsError),

    /// Generation listing cannot be read.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Version control operations fail.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// External process cannot be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Friendly result alias :3
pub type Result<T, E = RunError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Captured;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};

    const LOCK_FILE: &str = "npins/sources.json";

    const GENERATIONS: &str = r#"[
        {"generation": 42, "nixosVersion": "24.11.20241001.abcdef0", "kernelVersion": "6.6.52", "current": true}
    ]"#;

    #[derive(Debug, Default)]
    struct FakeVcs {
        config_changed: Cell<bool>,
        pins_changed: Cell<bool>,
        files: Vec<PathBuf>,
        ops: RefCell<Vec<String>>,
    }

    impl FakeVcs {
        fn changed(config: bool, pins: bool) -> Self {
            let vcs = Self {
                files: vec![PathBuf::from("configuration.nix")],
                ..Default::default()
            };
            vcs.config_changed.set(config);
            vcs.pins_changed.set(pins);
            vcs
        }

        fn ops(&self) -> Vec<String> {
            self.ops.borrow().clone()
        }
    }

    impl Vcs for FakeVcs {
        fn has_changes(&self, pathspecs: &[String]) -> crate::vcs::Result<bool> {
            if pathspecs == [LOCK_FILE.to_string()] {
                Ok(self.pins_changed.get())
            } else {
                Ok(self.config_changed.get())
            }
        }

        fn tracked_files(&self, _patterns: &[String]) -> crate::vcs::Result<Vec<PathBuf>> {
            Ok(self.files.clone())
        }

        fn stage(&self, pathspecs: &[String]) -> crate::vcs::Result<()> {
            self.ops.borrow_mut().push(format!("stage {}", pathspecs.join(" ")));
            Ok(())
        }

        fn commit(&self, message: &str) -> crate::vcs::Result<Option<String>> {
            self.ops.borrow_mut().push(format!("commit {message}"));
            self.config_changed.set(false);
            self.pins_changed.set(false);
            Ok(Some("c0ffee".into()))
        }

        fn push(&self, remote: &str) -> crate::vcs::Result<()> {
            self.ops.borrow_mut().push(format!("push {remote}"));
            Ok(())
        }
    }

    /// Log directories removed once the owning runner goes away.
    #[derive(Debug, Default)]
    struct LogDirs(RefCell<Vec<PathBuf>>);

    impl Drop for LogDirs {
        fn drop(&mut self) {
            for dir in self.0.get_mut().drain(..) {
                let _ = std::fs::remove_dir_all(dir);
            }
        }
    }

    #[derive(Debug, Default)]
    struct FakeRunner {
        build_log: Vec<u8>,
        failing: Vec<&'static str>,
        missing: Vec<&'static str>,
        calls: RefCell<Vec<String>>,
        log_dirs: LogDirs,
    }

    impl FakeRunner {
        fn with_log(log: impl Into<Vec<u8>>) -> Self {
            Self {
                build_log: log.into(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn exit_of(&self, invocation: &Invocation) -> Exit {
            if self.failing.iter().any(|name| invocation.program() == *name) {
                Exit::code(1)
            } else {
                Exit::code(0)
            }
        }
    }

    impl Runner for FakeRunner {
        fn locate(&self, program: &OsStr) -> Option<PathBuf> {
            if self.missing.iter().any(|name| program == *name) {
                None
            } else {
                Some(PathBuf::from("/run/current-system/sw/bin").join(program))
            }
        }

        async fn interactive(&self, invocation: &Invocation) -> crate::process::Result<Exit> {
            self.calls.borrow_mut().push(invocation.to_string());
            Ok(self.exit_of(invocation))
        }

        async fn captured(&self, invocation: &Invocation) -> crate::process::Result<Captured> {
            self.calls.borrow_mut().push(invocation.to_string());
            let stdout = match invocation.program().to_string_lossy().as_ref() {
                "pin-path" => "\"/nix/store/abc-nixpkgs\"\n".to_string(),
                "generations" => GENERATIONS.to_string(),
                _ => String::new(),
            };

            Ok(Captured {
                exit: self.exit_of(invocation),
                stdout,
                stderr: String::new(),
            })
        }

        async fn logged(&self, invocation: &Invocation, log: &Path) -> crate::process::Result<Exit> {
            self.calls.borrow_mut().push(invocation.to_string());
            let content = match invocation.program().to_string_lossy().as_ref() {
                "rebuild" => self.build_log.clone(),
                _ => Vec::new(),
            };
            let dir = log.parent().unwrap();
            std::fs::create_dir_all(dir).unwrap();
            self.log_dirs.0.borrow_mut().push(dir.to_path_buf());
            std::fs::write(log, content).unwrap();

            Ok(self.exit_of(invocation))
        }
    }

    #[derive(Debug, Default)]
    struct FakeNotifier {
        sent: RefCell<Vec<(Urgency, String)>>,
    }

    impl Notifier for FakeNotifier {
        fn notify(&self, urgency: Urgency, summary: &str, _body: &str) {
            self.sent.borrow_mut().push((urgency, summary.to_string()));
        }
    }

    fn settings(name: &str) -> Settings {
        let log_dir = std::env::temp_dir()
            .join(format!("rebuilder-unit-{}-{name}", std::process::id()));
        Settings {
            repository: PathBuf::from("/home/blah/nixos"),
            editor: Some(CommandLine::new("editor")),
            log_dir,
            lock_file: LOCK_FILE.into(),
            commands: crate::config::Commands {
                formatter: CommandLine::new("formatter"),
                pin_update: CommandLine::new("pin-update"),
                pin_path: CommandLine::new("pin-path"),
                rebuild: CommandLine::new("rebuild"),
                generations: CommandLine::new("generations"),
                garbage_collect: CommandLine::new("gc"),
                boot_refresh: CommandLine::new("boot-refresh"),
                notify: CommandLine::new("notify"),
            },
            ..Default::default()
        }
    }

    fn orchestrator(
        name: &str,
        vcs: FakeVcs,
        runner: FakeRunner,
    ) -> Orchestrator<FakeVcs, FakeRunner, FakeNotifier> {
        Orchestrator::new(settings(name), vcs, runner, FakeNotifier::default())
    }

    fn options() -> RunOptions {
        RunOptions::default()
    }

    #[tokio::test]
    async fn unchanged_run_is_a_true_no_op() -> anyhow::Result<()> {
        let orch = orchestrator("noop", FakeVcs::changed(false, false), FakeRunner::default());

        let report = orch.run(&options()).await?;

        assert_eq!(report, RunReport::Unchanged);
        assert!(orch.runner().calls().is_empty());
        assert!(orch.vcs.ops().is_empty());
        assert!(orch.notifier().sent.borrow().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn push_without_changes_only_pushes() -> anyhow::Result<()> {
        let orch = orchestrator("push-only", FakeVcs::changed(false, false), FakeRunner::default());
        let opts = RunOptions {
            push: true,
            ..options()
        };

        let report = orch.run(&opts).await?;

        assert_eq!(report, RunReport::Pushed);
        assert!(orch.runner().calls().is_empty());
        assert_eq!(orch.vcs.ops(), vec!["push origin".to_string()]);

        Ok(())
    }

    #[tokio::test]
    async fn force_rebuilds_without_changes() -> anyhow::Result<()> {
        let orch = orchestrator("force", FakeVcs::changed(false, false), FakeRunner::with_log("done\n"));
        let opts = RunOptions {
            force: true,
            ..options()
        };

        let report = orch.run(&opts).await?;

        assert!(matches!(report, RunReport::Rebuilt { .. }));
        assert!(orch
            .runner()
            .calls()
            .iter()
            .any(|call| call.starts_with("rebuild switch")));

        Ok(())
    }

    #[tokio::test]
    async fn successful_rebuild_commits_generation() -> anyhow::Result<()> {
        let orch = orchestrator("success", FakeVcs::changed(true, false), FakeRunner::with_log("activating\n"));

        let report = orch.run(&options()).await?;

        let expect_generation = Generation {
            id: 42,
            nixos_version: "24.11.20241001.abcdef0".into(),
            kernel_version: "6.6.52".into(),
        };
        assert_eq!(
            report,
            RunReport::Rebuilt {
                generation: expect_generation,
                commit: Some("c0ffee".into()),
            }
        );
        assert_eq!(
            orch.runner().calls(),
            vec![
                "formatter configuration.nix".to_string(),
                "pin-path".to_string(),
                "rebuild switch -I nixpkgs=/nix/store/abc-nixpkgs -I nixos-config=/home/blah/nixos/configuration.nix".to_string(),
                "generations".to_string(),
            ]
        );
        assert_eq!(
            orch.vcs.ops(),
            vec![
                "stage npins/sources.json *.nix".to_string(),
                "commit Gen: 42 NixOS: 24.11 Kernel: 6.6.52".to_string(),
            ]
        );
        assert_eq!(
            orch.notifier().sent.borrow().clone(),
            vec![(Urgency::Normal, "Rebuild succeeded".to_string())]
        );

        Ok(())
    }

    #[tokio::test]
    async fn error_marker_blocks_commit_despite_zero_exit() {
        let log = "building...\nerror: attribute 'foo' missing\n";
        let orch = orchestrator("error", FakeVcs::changed(true, false), FakeRunner::with_log(log));

        let result = orch.run(&options()).await;

        assert!(matches!(
            result,
            Err(RunError::Build { ref reason, .. }) if reason == "attribute 'foo' missing"
        ));
        assert!(orch.vcs.ops().is_empty());
        assert_eq!(
            orch.notifier().sent.borrow().clone(),
            vec![(Urgency::Critical, "Rebuild failed".to_string())]
        );
    }

    #[tokio::test]
    async fn kill_marker_classifies_as_killed() {
        let log = "building '/nix/store/abc-linux.drv'...\ncc1: received SIGKILL\n";
        let orch = orchestrator("killed", FakeVcs::changed(false, true), FakeRunner::with_log(log));

        let result = orch.run(&options()).await;

        assert!(matches!(result, Err(RunError::Killed { .. })));
        assert!(orch.vcs.ops().is_empty());
    }

    #[tokio::test]
    async fn format_failure_stops_before_build() {
        let runner = FakeRunner {
            failing: vec!["formatter"],
            ..Default::default()
        };
        let orch = orchestrator("format", FakeVcs::changed(true, false), runner);

        let result = orch.run(&options()).await;

        assert!(matches!(result, Err(RunError::Format)));
        assert_eq!(
            orch.runner().calls(),
            vec!["formatter configuration.nix".to_string()]
        );
        assert!(orch.vcs.ops().is_empty());
    }

    #[tokio::test]
    async fn boot_and_limited_shape_rebuild_arguments() -> anyhow::Result<()> {
        let orch = orchestrator("boot", FakeVcs::changed(true, false), FakeRunner::with_log(""));
        let opts = RunOptions {
            boot: true,
            limited: true,
            ..options()
        };

        orch.run(&opts).await?;

        assert!(orch.runner().calls().contains(
            &"rebuild boot -I nixpkgs=/nix/store/abc-nixpkgs -I nixos-config=/home/blah/nixos/configuration.nix --max-jobs 2 --cores 2".to_string()
        ));

        Ok(())
    }

    #[tokio::test]
    async fn push_and_clean_follow_commit() -> anyhow::Result<()> {
        let runner = FakeRunner {
            failing: vec!["gc"],
            ..FakeRunner::with_log("ok\n")
        };
        let orch = orchestrator("clean", FakeVcs::changed(true, false), runner);
        let opts = RunOptions {
            push: true,
            clean: true,
            ..options()
        };

        let report = orch.run(&opts).await?;

        assert!(matches!(report, RunReport::Rebuilt { .. }));
        assert_eq!(orch.vcs.ops().last(), Some(&"push origin".to_string()));
        let calls = orch.runner().calls();
        assert_eq!(
            calls[calls.len() - 2..].to_vec(),
            vec!["gc".to_string(), "boot-refresh".to_string()]
        );

        Ok(())
    }

    #[tokio::test]
    async fn second_run_after_commit_is_a_no_op() -> anyhow::Result<()> {
        let orch = orchestrator("twice", FakeVcs::changed(true, true), FakeRunner::with_log("ok\n"));

        let first = orch.run(&options()).await?;
        let calls = orch.runner().calls().len();
        let second = orch.run(&options()).await?;

        assert!(matches!(first, RunReport::Rebuilt { .. }));
        assert_eq!(second, RunReport::Unchanged);
        assert_eq!(orch.runner().calls().len(), calls);

        Ok(())
    }

    #[tokio::test]
    async fn edit_opens_default_entry_point() -> anyhow::Result<()> {
        let orch = orchestrator("edit", FakeVcs::changed(false, false), FakeRunner::default());
        let opts = RunOptions {
            edit: Some(None),
            ..options()
        };

        orch.run(&opts).await?;

        assert_eq!(
            orch.runner().calls(),
            vec!["editor /home/blah/nixos/configuration.nix".to_string()]
        );

        Ok(())
    }

    #[tokio::test]
    async fn update_failure_is_fatal() {
        let runner = FakeRunner {
            failing: vec!["pin-update"],
            ..Default::default()
        };
        let orch = orchestrator("update", FakeVcs::changed(true, false), runner);
        let opts = RunOptions {
            update: true,
            ..options()
        };

        let result = orch.run(&opts).await;

        assert!(matches!(result, Err(RunError::Update(_))));
        assert_eq!(orch.runner().calls(), vec!["pin-update".to_string()]);
    }

    #[tokio::test]
    async fn missing_tool_fails_before_side_effects() {
        let runner = FakeRunner {
            missing: vec!["rebuild"],
            ..Default::default()
        };
        let orch = orchestrator("missing", FakeVcs::changed(true, false), runner);

        let result = orch.run(&options()).await;

        assert!(matches!(result, Err(RunError::MissingTool(ref name)) if name == "rebuild"));
        assert!(orch.runner().calls().is_empty());
    }

    #[tokio::test]
    async fn non_utf8_build_log_without_marker_succeeds() -> anyhow::Result<()> {
        let log = &b"building...\ncompiling caf\xe9.c\nactivating the configuration...\n"[..];
        let orch = orchestrator("latin1", FakeVcs::changed(true, false), FakeRunner::with_log(log));

        let report = orch.run(&options()).await?;

        assert!(matches!(report, RunReport::Rebuilt { commit: Some(_), .. }));
        assert_eq!(
            orch.vcs.ops().last(),
            Some(&"commit Gen: 42 NixOS: 24.11 Kernel: 6.6.52".to_string())
        );

        Ok(())
    }

    #[tokio::test]
    async fn non_utf8_build_log_with_marker_fails() {
        let log = &b"compiling caf\xe9.c\nerror: caf\xe9.c: no such file\n"[..];
        let orch = orchestrator("latin1-error", FakeVcs::changed(true, false), FakeRunner::with_log(log));

        let result = orch.run(&options()).await;

        assert!(matches!(result, Err(RunError::Build { .. })));
        assert!(orch.vcs.ops().is_empty());
    }

    #[tokio::test]
    async fn formatter_skipped_without_tracked_files() -> anyhow::Result<()> {
        let vcs = FakeVcs {
            files: Vec::new(),
            ..FakeVcs::changed(false, false)
        };
        let orch = orchestrator("no-files", vcs, FakeRunner::with_log("done\n"));
        let opts = RunOptions {
            force: true,
            ..options()
        };

        let report = orch.run(&opts).await?;

        assert!(matches!(report, RunReport::Rebuilt { .. }));
        assert!(!orch.runner().calls().iter().any(|call| call.starts_with("formatter")));
        assert!(orch
            .runner()
            .calls()
            .iter()
            .any(|call| call.starts_with("rebuild switch")));

        Ok(())
    }
}
