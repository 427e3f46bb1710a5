//! The project validator (spec §6 "Project validator"): an opaque
//! project-local command whose exit status is the only signal consumed.

use std::path::Path;

use crate::runner::run;

/// Run the configured validator command in `cwd`. `argv[0]` is typically
/// `"validate"` or a project-specific script; any spawn failure is also
/// treated as "not green" since there is no separate error channel for it
/// (spec §6 "exit code is the sole signal").
#[must_use]
pub fn is_green(argv: &[&str], cwd: &Path) -> bool {
    run(argv, cwd).is_ok_and(|o| o.success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_is_green() {
        assert!(is_green(&["true"], &std::env::temp_dir()));
    }

    #[test]
    fn nonzero_exit_is_not_green() {
        assert!(!is_green(&["false"], &std::env::temp_dir()));
    }

    #[test]
    fn missing_binary_is_not_green() {
        assert!(!is_green(&["definitely-not-a-real-binary-xyz"], &std::env::temp_dir()));
    }
}
