//! Error types for domain-level (non-process) failures.

use thiserror::Error;

/// Errors raised by pure `ralph-core` operations.
///
/// Distinct from `ralph_proc::ProcError`: nothing in this crate shells out,
/// so there is no exit-code or I/O variant here beyond reading the small
/// task/log files it owns.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A task file could not be read or written.
    #[error("task file {path}: {message}")]
    TaskFile {
        /// Path to the offending file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A task text was empty or whitespace-only after trimming.
    #[error("task text must not be empty")]
    EmptyTask,
}
