// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Desktop notifications.
//!
//! Notifications are best-effort. A missing notification daemon or a
//! failing notifier never affects the outcome of a rebuild.

use crate::config::CommandLine;

use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Urgency of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

impl Urgency {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Critical => "critical",
        }
    }
}

/// Way to tell the user about an outcome.
pub trait Notifier {
    /// Send notification without waiting for it to be delivered.
    ///
    /// Must be called from within a tokio runtime.
    fn notify(&self, urgency: Urgency, summary: &str, body: &str);
}

/// Notifier spawning a `notify-send` compatible program.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    command: CommandLine,
}

impl DesktopNotifier {
    /// Construct new desktop notifier.
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, urgency: Urgency, summary: &str, body: &str) {
        let spawned = Command::new(self.command.program())
            .args(self.command.args())
            .arg(format!("--urgency={}", urgency.as_str()))
            .arg(summary)
            .arg(body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        // INVARIANT: Never wait on notifier, the runtime reaps it once dropped.
        if let Err(error) = spawned {
            debug!("cannot notify through {}: {error}", self.command);
        }
    }
}
