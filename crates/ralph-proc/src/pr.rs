//! PR gateway (spec §4.3, C3) — wraps the `gh` CLI. Only the documented
//! JSON fields (`number`, `url`, `state`, `headRefName`, `mergeable`,
//! `mergeStateStatus`, `mergedAt`) are consumed (spec §6).

use std::path::Path;

use serde::Deserialize;

use crate::error::ProcError;
use crate::runner::{run, run_checked};

/// A pull request as read from `gh` (spec §3 "Pull Request record"). Never
/// stored durably — always re-read on demand.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub state: String,
    #[serde(rename = "headRefName")]
    pub head_ref_name: String,
    pub mergeable: Option<String>,
    #[serde(rename = "mergeStateStatus")]
    pub merge_state_status: Option<String>,
    #[serde(rename = "mergedAt")]
    pub merged_at: Option<String>,
}

impl PullRequest {
    #[must_use]
    pub fn is_shipped(&self) -> bool {
        self.merged_at.is_some()
    }
}

const VIEW_FIELDS: &str = "number,url,state,headRefName,mergeable,mergeStateStatus,mergedAt";

/// `push(cwd, branch)` (spec §4.3).
pub fn push(cwd: &Path, branch: &str) -> bool {
    run(&["git", "push", "--set-upstream", "origin", branch], cwd).is_ok_and(|o| o.success)
}

/// `findOpenPR` (spec §4.3): looks up the branch, returns only if open.
pub fn find_open_pr(cwd: &Path, branch: &str) -> Option<PullRequest> {
    let out = run(&["gh", "pr", "view", branch, "--json", VIEW_FIELDS], cwd).ok()?;
    if !out.success {
        return None;
    }
    let pr: PullRequest = serde_json::from_str(&out.stdout).ok()?;
    (pr.state == "OPEN").then_some(pr)
}

/// `createPR` (spec §4.3): on success, prefers re-reading by branch over
/// parsing the URL from stdout.
pub fn create_pr(cwd: &Path, branch: &str, title: &str, body: &str) -> Option<PullRequest> {
    let out = run(&["gh", "pr", "create", "--head", branch, "--title", title, "--body", body], cwd).ok()?;
    if !out.success {
        return None;
    }
    find_open_pr(cwd, branch).or_else(|| parse_pr_from_create_output(&out.stdout))
}

fn parse_pr_from_create_output(stdout: &str) -> Option<PullRequest> {
    let url = stdout.lines().find(|l| l.contains("/pull/"))?.trim().to_owned();
    let number = url.rsplit('/').next()?.parse().ok()?;
    Some(PullRequest {
        number,
        url,
        state: "OPEN".to_owned(),
        head_ref_name: String::new(),
        mergeable: None,
        merge_state_status: None,
        merged_at: None,
    })
}

/// `ensurePR = findOpenPR ?? createPR` (spec §4.3).
pub fn ensure_pr(cwd: &Path, branch: &str, title: &str, body: &str) -> Option<PullRequest> {
    find_open_pr(cwd, branch).or_else(|| create_pr(cwd, branch, title, body))
}

/// `readMergeState(cwd, n)` (spec §4.3).
pub fn read_merge_state(cwd: &Path, number: u64) -> Option<PullRequest> {
    let out = run(&["gh", "pr", "view", &number.to_string(), "--json", VIEW_FIELDS], cwd).ok()?;
    if !out.success {
        return None;
    }
    serde_json::from_str(&out.stdout).ok()
}

/// `ensureMergeable` (spec §4.3): on `CONFLICTING`/`DIRTY`, rebase from
/// main and push; abort the merge attempt on failure.
pub fn ensure_mergeable(cwd: &Path, branch: &str, number: u64) -> bool {
    let Some(pr) = read_merge_state(cwd, number) else { return false };
    let needs_rebase = matches!(pr.merge_state_status.as_deref(), Some("CONFLICTING" | "DIRTY"));
    if !needs_rebase {
        return true;
    }

    if run(&["git", "fetch", "origin", "main"], cwd).is_ok_and(|o| o.success)
        && run(&["git", "checkout", branch], cwd).is_ok_and(|o| o.success)
        && run(&["git", "merge", "origin/main", "--no-edit"], cwd).is_ok_and(|o| o.success)
    {
        push(cwd, branch)
    } else {
        let _ = run(&["git", "merge", "--abort"], cwd);
        false
    }
}

#[derive(Deserialize)]
struct OpenPrListEntry {
    number: u64,
    url: String,
    #[serde(rename = "headRefName")]
    head_ref_name: String,
}

/// One entry of `listOpenByPrefix` (spec §4.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenPr {
    pub number: u64,
    pub url: String,
    pub head_ref_name: String,
}

/// `listOpenByPrefix(cwd, prefix)` (spec §4.3).
pub fn list_open_by_prefix(cwd: &Path, prefix: &str) -> Result<Vec<OpenPr>, ProcError> {
    let out = run_checked(&["gh", "pr", "list", "--state", "open", "--json", "number,url,headRefName"], cwd)?;
    let entries: Vec<OpenPrListEntry> = serde_json::from_str(&out.stdout)
        .map_err(|e| ProcError::BadOutput { command: "gh pr list".to_owned(), message: e.to_string() })?;
    let wanted = format!("{prefix}-");
    Ok(entries
        .into_iter()
        .filter(|e| e.head_ref_name.starts_with(&wanted))
        .map(|e| OpenPr { number: e.number, url: e.url, head_ref_name: e.head_ref_name })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shipped_pr() {
        let json = r#"{"number":7,"url":"https://x/pull/7","state":"MERGED","headRefName":"h-007",
                        "mergeable":"MERGEABLE","mergeStateStatus":"CLEAN","mergedAt":"2026-01-01T00:00:00Z"}"#;
        let pr: PullRequest = serde_json::from_str(json).unwrap();
        assert!(pr.is_shipped());
    }

    #[test]
    fn parses_open_unshipped_pr() {
        let json = r#"{"number":7,"url":"https://x/pull/7","state":"OPEN","headRefName":"h-007",
                        "mergeable":"CONFLICTING","mergeStateStatus":"DIRTY","mergedAt":null}"#;
        let pr: PullRequest = serde_json::from_str(json).unwrap();
        assert!(!pr.is_shipped());
    }

    #[test]
    fn parse_pr_from_create_output_extracts_number() {
        let stdout = "Creating pull request...\nhttps://github.com/acme/repo/pull/42\n";
        let pr = parse_pr_from_create_output(stdout).unwrap();
        assert_eq!(pr.number, 42);
    }

    #[test]
    fn filters_open_prs_by_branch_prefix() {
        let entries = vec![
            OpenPrListEntry { number: 1, url: "u1".into(), head_ref_name: "harness-improvement-001".into() },
            OpenPrListEntry { number: 2, url: "u2".into(), head_ref_name: "unrelated-branch".into() },
        ];
        let wanted = "harness-improvement-";
        let filtered: Vec<_> = entries.into_iter().filter(|e| e.head_ref_name.starts_with(wanted)).collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].number, 1);
    }
}
