//! Worktree manager (spec §4.2, C2).
//!
//! Decisions are driven by three booleans — does the worktree directory
//! exist, does the branch exist, does the branch carry commits main
//! doesn't have — per the decision table in spec §4.2. All git access goes
//! through [`run`]/[`run_checked`] (argv array, no shell).

use std::path::{Path, PathBuf};

use crate::error::ProcError;
use crate::runner::run;

/// The outcome of [`create_or_resume`]: whether an existing branch/worktree
/// was reused, or a fresh one was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorktreeOutcome {
    pub resumed: bool,
}

fn branch_exists(repo: &Path, branch: &str) -> bool {
    run(&["git", "rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")], repo)
        .is_ok_and(|o| o.success)
}

fn has_work(repo: &Path, branch: &str) -> bool {
    run(&["git", "rev-list", "--count", &format!("main..{branch}")], repo)
        .ok()
        .filter(|o| o.success)
        .and_then(|o| o.stdout.trim().parse::<u64>().ok())
        .is_some_and(|n| n > 0)
}

/// `hasNewCommits` (spec §4.2): any git failure is treated as "no new
/// commits" rather than propagated, since this only gates a no-op check.
#[must_use]
pub fn has_new_commits(worktree_path: &Path) -> bool {
    run(&["git", "rev-list", "--count", "main..HEAD"], worktree_path)
        .ok()
        .filter(|o| o.success)
        .and_then(|o| o.stdout.trim().parse::<u64>().ok())
        .is_some_and(|n| n > 0)
}

/// Implements the `createOrResume` decision table (spec §4.2).
pub fn create_or_resume(repo: &Path, path: &Path, branch: &str) -> Result<WorktreeOutcome, ProcError> {
    let wt_exists = path.is_dir();
    let br_exists = branch_exists(repo, branch);
    let work = br_exists && has_work(repo, branch);

    match (wt_exists, br_exists, work) {
        (true, true, true) => {
            // Leave in place; best-effort repo-root symlink, tolerate "exists".
            symlink_worktree(repo, path, branch);
            Ok(WorktreeOutcome { resumed: true })
        }
        (true, true, false) => {
            remove_worktree(repo, path)?;
            delete_branch_force(repo, branch);
            add_fresh_branch(repo, path, branch)?;
            Ok(WorktreeOutcome { resumed: false })
        }
        (true, false, _) => {
            remove_worktree(repo, path)?;
            add_fresh_branch(repo, path, branch)?;
            Ok(WorktreeOutcome { resumed: false })
        }
        (false, true, true) => {
            run_checked_here(repo, &["git", "worktree", "add", path_str(path), branch])?;
            Ok(WorktreeOutcome { resumed: true })
        }
        (false, true, false) => {
            delete_branch_force(repo, branch);
            add_fresh_branch(repo, path, branch)?;
            Ok(WorktreeOutcome { resumed: false })
        }
        (false, false, _) => {
            add_fresh_branch(repo, path, branch)?;
            Ok(WorktreeOutcome { resumed: false })
        }
    }
}

#[cfg(unix)]
fn symlink_worktree(repo: &Path, path: &Path, branch: &str) {
    let link = repo.join(branch_slot_name(branch));
    let _ = std::os::unix::fs::symlink(path, link);
}

#[cfg(not(unix))]
fn symlink_worktree(_repo: &Path, _path: &Path, _branch: &str) {}

fn branch_slot_name(branch: &str) -> String {
    branch.rsplit('-').next().unwrap_or(branch).to_owned()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_default()
}

fn run_checked_here(repo: &Path, argv: &[&str]) -> Result<(), ProcError> {
    crate::runner::run_checked(argv, repo).map(|_| ())
}

fn remove_worktree(repo: &Path, path: &Path) -> Result<(), ProcError> {
    run_checked_here(repo, &["git", "worktree", "remove", "--force", path_str(path)])
}

fn delete_branch_force(repo: &Path, branch: &str) {
    let _ = run(&["git", "branch", "-D", branch], repo);
}

fn add_fresh_branch(repo: &Path, path: &Path, branch: &str) -> Result<(), ProcError> {
    run_checked_here(repo, &["git", "worktree", "add", "-b", branch, path_str(path), "main"])
}

/// `cleanup` (spec §4.2): remove the worktree and delete the branch,
/// tolerant of branch-delete failure (the branch may carry unmerged work
/// the caller wants preserved at the ref level even after the directory is
/// gone, or may already be gone).
pub fn cleanup(repo: &Path, path: &Path, branch: &str) -> Result<(), ProcError> {
    remove_worktree(repo, path)?;
    let _ = run(&["git", "branch", "-d", branch], repo);
    Ok(())
}

/// Record of one worktree a worker owns while active (spec §3 "Worktree
/// record").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorktreeRecord {
    pub slot: u32,
    pub path: PathBuf,
    pub branch: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let run = |args: &[&str]| {
            Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "t@example.com"]);
        run(&["config", "user.name", "t"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);
        dir
    }

    #[test]
    fn fresh_branch_and_worktree_created_when_neither_exists() {
        let dir = init_repo();
        let wt = dir.path().join("wt-1");
        let outcome = create_or_resume(dir.path(), &wt, "harness-improvement-001").unwrap();
        assert!(!outcome.resumed);
        assert!(wt.is_dir());
    }

    #[test]
    fn no_new_commits_on_untouched_worktree() {
        let dir = init_repo();
        let wt = dir.path().join("wt-1");
        create_or_resume(dir.path(), &wt, "harness-improvement-001").unwrap();
        assert!(!has_new_commits(&wt));
    }

    #[test]
    fn resume_reuses_branch_with_commits() {
        let dir = init_repo();
        let wt = dir.path().join("wt-1");
        create_or_resume(dir.path(), &wt, "harness-improvement-001").unwrap();
        std::fs::write(wt.join("a.txt"), "x").unwrap();
        Command::new("git").args(["add", "."]).current_dir(&wt).output().unwrap();
        Command::new("git").args(["commit", "-m", "work"]).current_dir(&wt).output().unwrap();
        assert!(has_new_commits(&wt));

        let outcome = create_or_resume(dir.path(), &wt, "harness-improvement-001").unwrap();
        assert!(outcome.resumed);
        assert!(has_new_commits(&wt));
    }

    #[test]
    fn branch_without_commits_is_recreated_fresh() {
        let dir = init_repo();
        let wt = dir.path().join("wt-1");
        create_or_resume(dir.path(), &wt, "harness-improvement-001").unwrap();
        // No commits were added; re-running should recreate (not "resume").
        let outcome = create_or_resume(dir.path(), &wt, "harness-improvement-001").unwrap();
        assert!(!outcome.resumed);
    }
}
