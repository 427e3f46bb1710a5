//! Backlog refill normalization (spec §4.7.4): after the refill agent
//! runs, drop generic ESLint-suppression noise tasks and replace them
//! with one canonical cleanup task per rule actually suppressed in the
//! project, so the backlog doesn't fill up with duplicate busywork.

const NOISE_MARKERS: &[&str] = &["eslint-disable", "eslint-disable-next-line", "remove eslint suppression"];

fn is_noise(task: &str) -> bool {
    let lower = task.to_lowercase();
    NOISE_MARKERS.iter().any(|m| lower.contains(m))
}

fn canonical_cleanup_task(rule: &str) -> String {
    format!("Remove eslint-disable suppressions for rule `{rule}` and fix the underlying violations.")
}

/// Strip noise tasks, then add one canonical task per suppressed rule that
/// doesn't already have one. `suppressed_rules` is the caller-supplied list
/// of rule names actually found suppressed in the project (spec: "keyed by
/// actually-suppressed rules read from the project's lint config").
#[must_use]
pub fn normalize_backlog(tasks: &[String], suppressed_rules: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = tasks.iter().filter(|t| !is_noise(t)).cloned().collect();
    for rule in suppressed_rules {
        let canonical = canonical_cleanup_task(rule);
        if !kept.contains(&canonical) {
            kept.push(canonical);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_generic_noise_tasks() {
        let tasks = vec!["Remove eslint-disable comment in foo.ts".to_owned(), "Fix a real bug".to_owned()];
        let result = normalize_backlog(&tasks, &[]);
        assert_eq!(result, vec!["Fix a real bug".to_owned()]);
    }

    #[test]
    fn adds_one_canonical_task_per_suppressed_rule() {
        let result = normalize_backlog(&[], &["no-unused-vars".to_owned(), "no-explicit-any".to_owned()]);
        assert_eq!(result.len(), 2);
        assert!(result[0].contains("no-unused-vars"));
    }

    #[test]
    fn is_idempotent_when_canonical_task_already_present() {
        let existing = canonical_cleanup_task("no-unused-vars");
        let result = normalize_backlog(&[existing.clone()], &["no-unused-vars".to_owned()]);
        assert_eq!(result, vec![existing]);
    }
}
