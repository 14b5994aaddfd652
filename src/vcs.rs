// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control of the configuration repository.
//!
//! The configuration repository is an ordinary non-bare Git repository. The
//! rebuild workflow only ever needs five things from it: whether a set of
//! pathspecs differs from HEAD, which tracked files match a set of patterns,
//! staging, committing, and pushing the current branch.
//!
//! # Pathspecs
//!
//! Patterns follow Git pathspec semantics with `*` also matching directory
//! separators. Thus, `*.nix` selects every Nix file in the repository, not
//! just the ones at the top-level.

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    IndexAddOption, PushOptions, RemoteCallbacks, Repository, Status, StatusOptions,
};
use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Version control operations used by the rebuild workflow.
pub trait Vcs {
    /// Check if any tracked path matching pathspecs differs from HEAD.
    ///
    /// Considers both staged and unstaged modifications. Untracked files do
    /// not count.
    fn has_changes(&self, pathspecs: &[String]) -> Result<bool>;

    /// List tracked files matching patterns that exist in the work tree.
    ///
    /// Paths are relative to repository root.
    fn tracked_files(&self, patterns: &[String]) -> Result<Vec<PathBuf>>;

    /// Stage every path matching pathspecs, deletions included.
    fn stage(&self, pathspecs: &[String]) -> Result<()>;

    /// Commit staged content.
    ///
    /// Returns the new commit id, or `None` if the staged tree is identical
    /// to HEAD's tree so there is nothing to commit.
    fn commit(&self, message: &str) -> Result<Option<String>>;

    /// Push current branch to named remote.
    fn push(&self, remote: &str) -> Result<()>;
}

/// Version control through libgit2.
pub struct Git2Vcs {
    repository: Repository,
}

impl Git2Vcs {
    /// Open repository at target path.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if path is not a Git repository.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("open repository: {:?}", path.as_ref().display());
        let repository = Repository::open(path.as_ref())?;

        Ok(Self { repository })
    }

    fn workdir(&self) -> Result<&Path> {
        self.repository.workdir().ok_or(VcsError::Bare)
    }

    fn head_tree_id(&self) -> Option<git2::Oid> {
        self.repository
            .head()
            .ok()
            .and_then(|head| head.peel_to_tree().ok())
            .map(|tree| tree.id())
    }
}

impl std::fmt::Debug for Git2Vcs {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Git2Vcs")
            .field("repository", &self.repository.path())
            .finish()
    }
}

impl Vcs for Git2Vcs {
    #[instrument(skip(self), level = "debug")]
    fn has_changes(&self, pathspecs: &[String]) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false)
            .include_ignored(false)
            .include_unmodified(false);
        for pathspec in pathspecs {
            opts.pathspec(pathspec.as_str());
        }

        let statuses = self.repository.statuses(Some(&mut opts))?;
        let changed = statuses
            .iter()
            .filter(|entry| !entry.status().intersects(Status::IGNORED | Status::WT_NEW))
            .inspect(|entry| debug!("changed: {:?} {:?}", entry.path(), entry.status()))
            .count();

        Ok(changed > 0)
    }

    #[instrument(skip(self), level = "debug")]
    fn tracked_files(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let patterns = patterns
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        let workdir = self.workdir()?;
        let index = self.repository.index()?;

        let mut files = Vec::new();
        for entry in index.iter() {
            let path = PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned());
            if !patterns.iter().any(|pattern| pattern.matches_path(&path)) {
                continue;
            }

            // INVARIANT: Skip files deleted from work tree but still in index.
            if workdir.join(&path).exists() {
                files.push(path);
            }
        }

        Ok(files)
    }

    #[instrument(skip(self), level = "debug")]
    fn stage(&self, pathspecs: &[String]) -> Result<()> {
        let mut index = self.repository.index()?;
        index.add_all(pathspecs.iter().map(String::as_str), IndexAddOption::DEFAULT, None)?;
        index.update_all(pathspecs.iter().map(String::as_str), None)?;
        index.write()?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn commit(&self, message: &str) -> Result<Option<String>> {
        let mut index = self.repository.index()?;
        let tree_id = index.write_tree()?;

        // INVARIANT: Never produce empty commits.
        if self.head_tree_id() == Some(tree_id) {
            info!("nothing to commit, staged tree matches HEAD");
            return Ok(None);
        }

        let tree = self.repository.find_tree(tree_id)?;
        let signature = self.repository.signature()?;
        let parent = match self.repository.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(error) if error.code() == git2::ErrorCode::UnbornBranch => None,
            Err(error) => return Err(error.into()),
        };
        let parents = parent.iter().collect::<Vec<_>>();

        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        info!("commit {oid}: {message}");

        Ok(Some(oid.to_string()))
    }

    /// Push current branch to named remote.
    ///
    /// Pushes the branch HEAD points to onto the branch of the same name at
    /// the remote. The progress of the push is displayed through a progress
    /// bar. If any credentials are required, then the user will be prompted
    /// for them accordingly. The progress bar will be blocked for user input.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::DetachedHead`] if HEAD is not a branch.
    /// - Return [`VcsError::Rejected`] if remote rejects the update.
    /// - Return [`VcsError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self), level = "debug")]
    fn push(&self, remote: &str) -> Result<()> {
        let head = self.repository.head()?;
        if !head.is_branch() {
            return Err(VcsError::DetachedHead);
        }
        let refname = head.name().ok_or(VcsError::DetachedHead)?.to_string();
        let refspec = format!("{refname}:{refname}");
        info!("push {refname} to {remote}");

        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(format!("{remote} {refname}"));
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar);
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = self.repository.config()?;
        let mut remote = self.repository.find_remote(remote)?;

        let mut rejected: Option<String> = None;
        {
            let mut throttle = time::Instant::now();
            let mut rc = RemoteCallbacks::new();
            rc.credentials(authenticator.credentials(&config));
            rc.push_transfer_progress(|current, total, _bytes| {
                if throttle.elapsed() > time::Duration::from_millis(10) {
                    throttle = time::Instant::now();
                    prompter.bar.set_length(total as u64);
                    prompter.bar.set_position(current as u64);
                }
            });
            rc.push_update_reference(|name, status| {
                if let Some(status) = status {
                    rejected = Some(format!("{name}: {status}"));
                }
                Ok(())
            });

            let mut po = PushOptions::new();
            po.remote_callbacks(rc);
            let result = remote.push(&[refspec.as_str()], Some(&mut po));
            prompter.bar.finish_and_clear();
            result?;
        }

        if let Some(reason) = rejected {
            return Err(VcsError::Rejected(reason));
        }

        Ok(())
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Repository has no work tree.
    #[error("configuration repository must not be bare")]
    Bare,

    /// HEAD does not point to a branch.
    #[error("HEAD does not point to a branch")]
    DetachedHead,

    /// Remote refused reference update.
    #[error("remote rejected update of {0}")]
    Rejected(String),

    /// Pattern cannot be parsed.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;
