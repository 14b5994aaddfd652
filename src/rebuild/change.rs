// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Change detection.
//!
//! Decides once per run whether the rebuild pipeline proceeds. The rules
//! are checked in priority order and the first match wins:
//!
//! 1. Configuration files modified.
//! 2. Pin lock file modified.
//! 3. Rebuild forced.
//! 4. Push requested with nothing changed, only push.
//! 5. Nothing to do.
//!
//! An unforced, unpushed run without changes is a true no-op, so it is safe
//! to run repeatedly, e.g., from a timer.

use crate::options::RunOptions;

/// Change state of configuration repository for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    /// Declarative configuration files differ from HEAD.
    ConfigChanged,

    /// Pin lock file differs from HEAD.
    PinsChanged,

    /// Nothing changed, but rebuild was forced.
    ForcedNoChange,

    /// Nothing changed, only push to remote.
    NoChangePushOnly,

    /// Nothing changed, do nothing at all.
    NoChangeSkip,
}

impl ChangeState {
    /// Derive change state from diff results and run options.
    pub fn detect(config_changed: bool, pins_changed: bool, options: &RunOptions) -> Self {
        if config_changed {
            Self::ConfigChanged
        } else if pins_changed {
            Self::PinsChanged
        } else if options.force {
            Self::ForcedNoChange
        } else if options.push {
            Self::NoChangePushOnly
        } else {
            Self::NoChangeSkip
        }
    }

    /// Check if the rebuild pipeline should run.
    pub fn proceeds(&self) -> bool {
        matches!(
            self,
            Self::ConfigChanged | Self::PinsChanged | Self::ForcedNoChange
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    fn options(force: bool, push: bool) -> RunOptions {
        RunOptions {
            force,
            push,
            ..Default::default()
        }
    }

    #[test_case(true, true, true, true, ChangeState::ConfigChanged; "config wins over everything")]
    #[test_case(true, false, false, false, ChangeState::ConfigChanged; "config only")]
    #[test_case(false, true, true, true, ChangeState::PinsChanged; "pins win over flags")]
    #[test_case(false, true, false, false, ChangeState::PinsChanged; "pins only")]
    #[test_case(false, false, true, true, ChangeState::ForcedNoChange; "force wins over push")]
    #[test_case(false, false, true, false, ChangeState::ForcedNoChange; "force only")]
    #[test_case(false, false, false, true, ChangeState::NoChangePushOnly; "push only")]
    #[test_case(false, false, false, false, ChangeState::NoChangeSkip; "nothing")]
    #[test]
    fn detect_in_priority_order(
        config: bool,
        pins: bool,
        force: bool,
        push: bool,
        expect: ChangeState,
    ) {
        let result = ChangeState::detect(config, pins, &options(force, push));
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test]
    fn only_changes_or_force_proceed() {
        assert!(ChangeState::ConfigChanged.proceeds());
        assert!(ChangeState::PinsChanged.proceeds());
        assert!(ChangeState::ForcedNoChange.proceeds());
        assert!(!ChangeState::NoChangePushOnly.proceeds());
        assert!(!ChangeState::NoChangeSkip.proceeds());
    }
}
