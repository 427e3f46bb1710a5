//! Commit/PR title construction (spec §4.6.2).

const LOW_SIGNAL: &[&str] = &["x", "fix", "fixes", "something", "improvement", "update", "changes", "misc"];
const MAX_TITLE_LEN: usize = 72;

/// Strip a `PLAN:`/`Title:` prefix and trailing punctuation, then reject
/// candidates the spec calls low-signal: empty, shorter than 4 chars,
/// single-word, or in the low-signal set.
fn clean_candidate(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    for prefix in ["PLAN:", "Title:"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
        }
    }
    let s = s.trim_end_matches(['.', '!', '?', ',', ';', ':']).trim();
    if s.len() < 4 {
        return None;
    }
    if !s.contains(char::is_whitespace) {
        return None;
    }
    if LOW_SIGNAL.contains(&s.to_lowercase().as_str()) {
        return None;
    }
    Some(s.to_owned())
}

/// Infer a conventional-commit type prefix from free text (spec §4.6.2
/// keyword heuristics). Checked in the documented order.
fn infer_type(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if lower.contains("test") {
        "test"
    } else if lower.contains("doc") {
        "docs"
    } else if lower.contains("lint") || lower.contains("ci") || lower.contains("pipeline") || lower.contains("workflow") {
        "ci"
    } else if lower.contains("refactor") {
        "refactor"
    } else if lower.contains("fix") {
        "fix"
    } else if lower.contains("add") || lower.contains("implement") || lower.contains("create") || lower.contains("introduce") {
        "feat"
    } else {
        "chore"
    }
}

fn has_conventional_prefix(s: &str) -> bool {
    ["feat", "fix", "docs", "ci", "refactor", "test", "chore", "perf", "build", "style"]
        .iter()
        .any(|t| s.starts_with(&format!("{t}: ")) || s.starts_with(&format!("{t}(")))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let keep = max.saturating_sub(3);
    let truncated: String = s.chars().take(keep).collect();
    format!("{truncated}...")
}

/// Build a commit/PR title from a plan summary and the original task
/// (spec §4.6.2). Prefers `plan_summary` over `task_text` over the
/// fallback `improvement #N`.
#[must_use]
pub fn build_title(plan_summary: Option<&str>, task_text: Option<&str>, improvement: u64) -> String {
    let base = plan_summary
        .and_then(clean_candidate)
        .or_else(|| task_text.and_then(clean_candidate))
        .unwrap_or_else(|| format!("improvement #{improvement}"));

    let with_prefix = if has_conventional_prefix(&base) {
        base
    } else {
        format!("{}: {base}", infer_type(&base))
    };

    truncate(&with_prefix, MAX_TITLE_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_plan_over_task() {
        let t = build_title(Some("PLAN: Add unit tests"), Some("something else"), 1);
        assert_eq!(t, "test: Add unit tests");
    }

    #[test]
    fn falls_back_to_task_when_plan_low_signal() {
        let t = build_title(Some("fix"), Some("Refactor the parser module"), 2);
        assert_eq!(t, "refactor: Refactor the parser module");
    }

    #[test]
    fn falls_back_to_improvement_number() {
        let t = build_title(Some("x"), Some("misc"), 42);
        assert_eq!(t, "chore: improvement #42");
    }

    #[test]
    fn rejects_single_word() {
        let t = build_title(Some("Cleanup"), None, 3);
        assert_eq!(t, "chore: improvement #3");
    }

    #[test]
    fn truncates_at_exactly_72_chars_with_ellipsis() {
        let long = "a".repeat(100);
        let t = build_title(Some(&format!("feat: add {long} support")), None, 1);
        assert_eq!(t.chars().count(), 72);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn keeps_existing_conventional_prefix() {
        let t = build_title(Some("fix: resolve race condition"), None, 5);
        assert_eq!(t, "fix: resolve race condition");
    }

    #[test]
    fn infers_docs_prefix() {
        let t = build_title(Some("Update documentation for API"), None, 6);
        assert_eq!(t, "docs: Update documentation for API");
    }

    #[test]
    fn infers_ci_prefix() {
        let t = build_title(Some("Fix lint warnings in workflow"), None, 7);
        // "fix" check runs after "lint/ci" in the documented order, so ci wins.
        assert_eq!(t, "ci: Fix lint warnings in workflow");
    }
}
