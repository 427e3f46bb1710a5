//! Backlog/triage/merge-conflicts task-file store (spec §4.4).
//!
//! Files are plain line-oriented text: one `- <task>` per non-blank line.
//! All writes are whole-file rewrites — the files are small, so atomic
//! rewrite is not needed for correctness (spec §4.4 explicitly allows this).

use std::fs;
use std::path::{Path, PathBuf};

use crate::clock::now_rfc3339;
use crate::error::CoreError;
use crate::normalize::equivalent;

/// Parse `- <task>` lines out of raw file content, skipping blank lines and
/// lines that do not start with the bullet marker.
#[must_use]
pub fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            trimmed.strip_prefix("- ").map(str::trim).filter(|t| !t.is_empty()).map(ToOwned::to_owned)
        })
        .collect()
}

/// Render a list of task texts back to `- <task>` file content.
#[must_use]
pub fn render_lines(tasks: &[String]) -> String {
    let mut out = String::new();
    for t in tasks {
        out.push_str("- ");
        out.push_str(t.trim());
        out.push('\n');
    }
    out
}

/// A handle on one task file (backlog.md, triage.md, or merge-conflicts.md).
#[derive(Clone, Debug)]
pub struct TaskFile {
    path: PathBuf,
}

impl TaskFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all task lines, or an empty vec if the file does not exist.
    pub fn read(&self) -> Result<Vec<String>, CoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse_lines(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Overwrite the file with exactly these tasks.
    pub fn write(&self, tasks: &[String]) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        }
        fs::write(&self.path, render_lines(tasks)).map_err(|e| CoreError::TaskFile {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// First task, without removing it.
    pub fn peek(&self) -> Result<Option<String>, CoreError> {
        Ok(self.read()?.into_iter().next())
    }

    /// Remove and return the first task.
    pub fn pop(&self) -> Result<Option<String>, CoreError> {
        let mut tasks = self.read()?;
        if tasks.is_empty() {
            return Ok(None);
        }
        let first = tasks.remove(0);
        self.write(&tasks)?;
        Ok(Some(first))
    }

    /// Remove every line whose normalized form exactly matches `text`'s
    /// normalized form. Returns how many lines were removed.
    pub fn remove_by_text(&self, text: &str) -> Result<usize, CoreError> {
        let tasks = self.read()?;
        let before = tasks.len();
        let kept: Vec<String> = tasks
            .into_iter()
            .filter(|t| crate::normalize::normalize(t) != crate::normalize::normalize(text))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.write(&kept)?;
        }
        Ok(removed)
    }

    /// Remove every line that is equivalent (spec §4.4) to `task`. Used by
    /// `syncFromLog`. Returns the removed lines.
    pub fn remove_equivalent(&self, task: &str) -> Result<Vec<String>, CoreError> {
        let tasks = self.read()?;
        let (removed, kept): (Vec<String>, Vec<String>) =
            tasks.into_iter().partition(|t| equivalent(task, t));
        if !removed.is_empty() {
            self.write(&kept)?;
        }
        Ok(removed)
    }

    /// Append `text` unless an exactly-normalized-equal line already exists
    /// (idempotent triage insertion, spec §7 "addTriageTask is no-op on
    /// duplicates").
    pub fn add_if_absent(&self, text: &str) -> Result<bool, CoreError> {
        let mut tasks = self.read()?;
        let norm = crate::normalize::normalize(text);
        if tasks.iter().any(|t| crate::normalize::normalize(t) == norm) {
            return Ok(false);
        }
        tasks.push(text.trim().to_owned());
        self.write(&tasks)?;
        Ok(true)
    }
}

/// The merge-conflicts archive: append-only, with idempotence keyed on
/// `improvement=N branch=<b>` markers (spec §4.4, §7).
#[derive(Clone, Debug)]
pub struct MergeConflictArchive {
    path: PathBuf,
}

impl MergeConflictArchive {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn marker(improvement: u64, branch: &str) -> String {
        format!("improvement={improvement} branch={branch}")
    }

    fn contains_marker(&self, marker: &str) -> Result<bool, CoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().any(|l| l.contains(marker))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Append one dated record unless a record with the same
    /// improvement+branch marker already exists. Returns whether a line was
    /// appended.
    pub fn append_if_absent(
        &self,
        improvement: u64,
        branch: &str,
        worktree_path: &str,
        original_task: &str,
    ) -> Result<bool, CoreError> {
        let marker = Self::marker(improvement, branch);
        if self.contains_marker(&marker)? {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        }
        let line = format!("- {ts} {marker} worktree={worktree_path} task={original_task}\n", ts = now_rfc3339());
        use std::io::Write as _;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        f.write_all(line.as_bytes()).map_err(|e| CoreError::TaskFile {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(true)
    }
}

/// Build the triage text for an escalated merge conflict (spec §4.4).
#[must_use]
pub fn merge_conflict_triage_text(improvement: u64, branch: &str, worktree_path: &str, original_task: &str) -> String {
    format!(
        "Resolve merge conflict for improvement #{improvement} ({branch}) and merge to main. \
         Worktree: {worktree_path}. Original task: {original_task}"
    )
}

/// Build the triage text for an outstanding open PR discovered at startup
/// (spec §4.7.1).
#[must_use]
pub fn outstanding_pr_triage_text(number: u64, branch: &str, url: &str) -> String {
    format!("Resolve outstanding Ralph PR #{number} ({branch}) and merge to main. PR: {url}")
}

/// Prefix used to recognize a merge-conflict triage task (spec §4.6.1 step 2).
pub const MERGE_CONFLICT_TRIAGE_PREFIX: &str = "Resolve merge conflict for improvement #";

/// Prefix used to recognize an outstanding-PR triage task (spec §4.6.1 step 2).
pub const OUTSTANDING_PR_TRIAGE_PREFIX: &str = "Resolve outstanding Ralph PR #";

/// Human-escalation triage text for a parked review failure (spec §4.7.5).
#[must_use]
pub fn human_escalation_text(original_task: &str, worktree_path: &str) -> String {
    format!(
        "Human escalation required: review could not be completed for task \"{original_task}\". \
         Worktree preserved at: {worktree_path}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_read_write() {
        let dir = tempdir().unwrap();
        let f = TaskFile::new(dir.path().join("backlog.md"));
        let tasks = vec!["Add tests".to_owned(), "Fix bug".to_owned()];
        f.write(&tasks).unwrap();
        assert_eq!(f.read().unwrap(), tasks);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let f = TaskFile::new(dir.path().join("nope.md"));
        assert_eq!(f.read().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn pop_removes_first() {
        let dir = tempdir().unwrap();
        let f = TaskFile::new(dir.path().join("triage.md"));
        f.write(&["first".into(), "second".into()]).unwrap();
        assert_eq!(f.pop().unwrap(), Some("first".to_owned()));
        assert_eq!(f.read().unwrap(), vec!["second".to_owned()]);
    }

    #[test]
    fn add_if_absent_is_idempotent() {
        let dir = tempdir().unwrap();
        let f = TaskFile::new(dir.path().join("triage.md"));
        assert!(f.add_if_absent("Do the thing").unwrap());
        assert!(!f.add_if_absent("Do the thing").unwrap());
        assert_eq!(f.read().unwrap(), vec!["Do the thing".to_owned()]);
    }

    #[test]
    fn remove_equivalent_matches_normalized_form() {
        let dir = tempdir().unwrap();
        let f = TaskFile::new(dir.path().join("backlog.md"));
        f.write(&["Fix the thing.".into(), "Unrelated task".into()]).unwrap();
        let removed = f.remove_equivalent("fix the thing").unwrap();
        assert_eq!(removed, vec!["Fix the thing.".to_owned()]);
        assert_eq!(f.read().unwrap(), vec!["Unrelated task".to_owned()]);
    }

    #[test]
    fn archive_append_is_idempotent_per_marker() {
        let dir = tempdir().unwrap();
        let archive = MergeConflictArchive::new(dir.path().join("merge-conflicts.md"));
        assert!(archive.append_if_absent(12, "harness-improvement-012", "/wt/012", "fix x").unwrap());
        assert!(!archive.append_if_absent(12, "harness-improvement-012", "/wt/012", "fix x").unwrap());
        let content = fs::read_to_string(dir.path().join("merge-conflicts.md")).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn parse_lines_ignores_blank_and_non_bullet_lines() {
        let content = "- one\n\nnot a task\n- two\n";
        assert_eq!(parse_lines(content), vec!["one".to_owned(), "two".to_owned()]);
    }

    proptest::proptest! {
        #[test]
        fn write_then_read_round_trips_nonempty_trimmed_lines(
            xs in proptest::collection::vec("[a-zA-Z0-9 ]{1,30}", 0..10)
        ) {
            let xs: Vec<String> = xs.into_iter().map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect();
            let dir = tempdir().unwrap();
            let f = TaskFile::new(dir.path().join("backlog.md"));
            f.write(&xs).unwrap();
            proptest::prop_assert_eq!(f.read().unwrap(), xs);
        }
    }
}
