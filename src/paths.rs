//! Known file locations under the configured project root (spec §6 "Task
//! files (all under a known config path)").

use std::path::{Path, PathBuf};

/// Plan documents live under this path relative to a worktree (spec
/// §4.6.1 step 2).
pub const PLAN_DOC_RELATIVE: &str = "thoughts/shared/plans/active/ralph-improvement.md";

#[derive(Clone, Debug)]
pub struct RalphPaths {
    root: PathBuf,
}

impl RalphPaths {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn backlog(&self) -> PathBuf {
        self.root.join("backlog.md")
    }

    #[must_use]
    pub fn triage(&self) -> PathBuf {
        self.root.join("triage.md")
    }

    #[must_use]
    pub fn merge_conflicts(&self) -> PathBuf {
        self.root.join("merge-conflicts.md")
    }

    #[must_use]
    pub fn event_log(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    #[must_use]
    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join("worktrees")
    }

    #[must_use]
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.worktrees_dir().join(branch)
    }

    #[must_use]
    pub fn plan_doc(worktree: &Path) -> PathBuf {
        worktree.join(PLAN_DOC_RELATIVE)
    }

    #[must_use]
    pub fn named_plan_doc(worktree: &Path, slug: &str) -> PathBuf {
        worktree.join("thoughts/shared/plans/active").join(format!("{slug}.md"))
    }
}
