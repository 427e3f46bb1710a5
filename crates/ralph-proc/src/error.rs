//! Error type for process-boundary failures.

use thiserror::Error;

/// Errors from shelling out to `git`, `gh`, or the project validator.
///
/// Mirrors the shape of `ralph_core::CoreError`'s `TaskFile` variant
/// (command + stderr + exit code instead of path + message) so callers can
/// pattern-match specific failure modes without parsing free text.
#[derive(Debug, Error)]
pub enum ProcError {
    /// The subprocess could not be spawned at all (binary missing, etc.).
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The subprocess ran and exited non-zero.
    #[error("`{command}` exited with {exit_code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Output that was supposed to be UTF-8/JSON was neither.
    #[error("could not parse output of `{command}`: {message}")]
    BadOutput { command: String, message: String },

    /// A worktree/branch operation hit a state the decision table doesn't
    /// expect (caller bug, not an external failure).
    #[error("invalid worktree state: {0}")]
    InvalidState(String),
}
