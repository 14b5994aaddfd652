// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build log scanning.
//!
//! The builder does not expose a structured failure contract, so failures
//! are classified by searching its captured output for literal markers, in
//! order:
//!
//! 1. [`ERROR_MARKER`] means the build failed.
//! 2. [`KILL_MARKER`] means the build was killed, usually by the OOM killer.
//!
//! Absence of both means success, whatever the exit code of the builder.
//!
//! # Pitfalls
//!
//! This is a heuristic. A failure reported without either marker goes
//! unnoticed, and a marker showing up in unrelated output, e.g., inside a
//! package name or an evaluation warning, fails an otherwise good build.

/// Marker of an explicit build error.
pub const ERROR_MARKER: &str = "error:";

/// Marker of a killed build.
pub const KILL_MARKER: &str = "SIGKILL";

/// Outcome of a rebuild attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    FormatFailure,
    BuildFailure(String),
    Killed,
}

impl BuildOutcome {
    /// Classify captured builder output.
    ///
    /// Reason of a build failure is the text following the first error
    /// marker. If the marker ends its line, the next non-empty line is used
    /// instead.
    pub fn classify(log: &str) -> Self {
        if log.contains(ERROR_MARKER) {
            return Self::BuildFailure(failure_reason(log));
        }

        if log.contains(KILL_MARKER) {
            return Self::Killed;
        }

        Self::Success
    }

    /// Check if outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

fn failure_reason(log: &str) -> String {
    let mut lines = log.lines().skip_while(|line| !line.contains(ERROR_MARKER));
    let Some(line) = lines.next() else {
        return String::new();
    };

    let (_, rest) = line.split_once(ERROR_MARKER).unwrap_or(("", line));
    let rest = rest.trim();
    if !rest.is_empty() {
        return rest.to_string();
    }

    lines
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_marker_means_failure() {
        let log = indoc! {r#"
            building the system configuration...
            error: builder for '/nix/store/abc-foo.drv' failed with exit code 1
            error: 1 dependencies of derivation '/nix/store/def-system.drv' failed to build
        "#};

        let result = BuildOutcome::classify(log);
        let expect = BuildOutcome::BuildFailure(
            "builder for '/nix/store/abc-foo.drv' failed with exit code 1".into(),
        );
        assert_eq!(result, expect);
    }

    #[test]
    fn error_marker_wins_over_kill_marker() {
        let log = indoc! {r#"
            building '/nix/store/abc-linux.drv'...
            process received SIGKILL
            error: build of '/nix/store/abc-linux.drv' failed
        "#};

        let result = BuildOutcome::classify(log);
        assert!(matches!(result, BuildOutcome::BuildFailure(_)));
    }

    #[test]
    fn kill_marker_alone_means_killed() {
        let log = indoc! {r#"
            building '/nix/store/abc-chromium.drv'...
            chromium> clang++: process killed with SIGKILL
        "#};

        assert_eq!(BuildOutcome::classify(log), BuildOutcome::Killed);
    }

    #[test]
    fn no_marker_means_success() {
        let log = indoc! {r#"
            building the system configuration...
            activating the configuration...
            setting up /etc...
            reloading user units for blah...
        "#};

        let result = BuildOutcome::classify(log);
        assert_eq!(result, BuildOutcome::Success);
        assert!(result.is_success());
    }

    #[test]
    fn marker_in_unrelated_text_still_fails() {
        let log = "copying path '/nix/store/abc-perl5.36-Try-Tiny-error:0.31' from cache\n";
        assert!(matches!(
            BuildOutcome::classify(log),
            BuildOutcome::BuildFailure(_)
        ));
    }

    #[test]
    fn reason_falls_through_to_next_line() {
        let log = indoc! {r#"
            error:

                   attribute 'foo' missing
        "#};

        assert_eq!(
            BuildOutcome::classify(log),
            BuildOutcome::BuildFailure("attribute 'foo' missing".into())
        );
    }
}
