//! The append-only JSONL event log and `syncFromLog` reconciliation (spec
//! §3 "Durable state", §4.4 "Reconciliation", §6 "Event log").
//!
//! Parsing is line-by-line and tolerant: a line that isn't valid JSON, or
//! that doesn't match a known event shape, is silently ignored (spec §5
//! "partial-line tears are treated as parse errors and ignored").

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::normalize::equivalent;

/// One record in the event log. `extra` fields on the wire are tolerated
/// via `serde`'s default behavior of ignoring unknown fields (no
/// `deny_unknown_fields` here, unlike the task/config structs — spec §6
/// says "extra fields allowed").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    #[serde(rename = "worker_started")]
    WorkerStarted { worker: u32, improvement: u64, task: String, ts: String },
    #[serde(rename = "worker_finished")]
    WorkerFinished { worker: u32, improvement: u64, success: bool, ts: String },
    #[serde(rename = "step_start")]
    StepStart { improvement: u64, step: String, backend: String, ts: String },
    #[serde(rename = "step_end")]
    StepEnd {
        step: String,
        backend: String,
        turns: u32,
        cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
        ts: String,
    },
    #[serde(rename = "merge_queued")]
    MergeQueued { worker: u32, improvement: u64, branch: String, ts: String },
    #[serde(rename = "merge_completed")]
    MergeCompleted { worker: u32, improvement: u64, branch: String, success: bool, ts: String },
    #[serde(rename = "improvement_done")]
    ImprovementDone { improvement: u64, total_cost_usd: f64, total_duration_ms: u64, ts: String },
    #[serde(rename = "improvement_failed")]
    ImprovementFailed { improvement: u64, reason: String, ts: String },
    #[serde(rename = "compaction")]
    Compaction { pre_tokens: u64, step: String, ts: String },
    #[serde(rename = "tool_call")]
    ToolCall { improvement: u64, name: String, summary: String, ts: String },
    #[serde(rename = "tool_result")]
    ToolResult { improvement: u64, name: String, summary: String, ts: String },
}

/// Append-only handle on the event log file.
#[derive(Clone, Debug)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line.
    pub fn append(&self, event: &Event) -> Result<(), CoreError> {
        use std::io::Write as _;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        }
        let line = serde_json::to_string(event).map_err(|e| CoreError::TaskFile {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        writeln!(f, "{line}").map_err(|e| CoreError::TaskFile {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Read and parse every well-formed event line; malformed or unknown
    /// lines are silently dropped.
    pub fn read_all(&self) -> Result<Vec<Event>, CoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse_events(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CoreError::TaskFile {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Parse raw JSONL content into events, dropping unparsable lines.
#[must_use]
pub fn parse_events(content: &str) -> Vec<Event> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<Event>(l).ok())
        .collect()
}

/// Legacy/current merge-commit subject markers that `syncFromLog` also
/// scans git history for (spec §3, §6, §9 open question about
/// configurable-prefix scope). Returns the improvement number embedded in
/// a merge-commit subject line, if any, for the given branch prefix.
#[must_use]
pub fn improvement_from_commit_subject(subject: &str, branch_prefix: &str) -> Option<u64> {
    // `<prefix>-NNN` anywhere in the subject.
    let dashed_prefix = format!("{branch_prefix}-");
    if let Some(pos) = subject.find(&dashed_prefix) {
        let rest = &subject[pos + dashed_prefix.len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty()
            && let Ok(n) = digits.parse::<u64>()
        {
            return Some(n);
        }
    }
    // Legacy markers: "harness: improvement #N", "harness-improvement-N", "change-N".
    for marker in ["harness: improvement #", "harness-improvement-", "change-"] {
        if let Some(pos) = subject.find(marker) {
            let rest = &subject[pos + marker.len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty()
                && let Ok(n) = digits.parse::<u64>()
            {
                return Some(n);
            }
        }
    }
    None
}

/// Result of one `syncFromLog` call (spec §4.4).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub merged_tasks_seen: usize,
    pub removed_from_backlog: Vec<String>,
    pub removed_from_triage: Vec<String>,
}

/// Pure reconciliation algorithm (spec §4.4 `syncFromLog`).
///
/// `events` is the already-parsed event log. `merged_commit_subjects` are
/// subject lines of merge commits on main (obtained externally via `git
/// log`). `backlog`/`triage` are the current file contents. Returns the
/// sync result plus the new backlog/triage contents with merged-equivalent
/// lines removed.
#[must_use]
pub fn sync_from_log(
    events: &[Event],
    merged_commit_subjects: &[String],
    branch_prefix: &str,
    backlog: &[String],
    triage: &[String],
) -> (SyncResult, Vec<String>, Vec<String>) {
    use std::collections::{HashMap, HashSet};

    let mut task_by_improvement: HashMap<u64, String> = HashMap::new();
    let mut merged_improvements: HashSet<u64> = HashSet::new();

    for event in events {
        match event {
            Event::WorkerStarted { improvement, task, .. } => {
                task_by_improvement.insert(*improvement, task.clone());
            }
            Event::MergeCompleted { improvement, success: true, .. } => {
                merged_improvements.insert(*improvement);
            }
            _ => {}
        }
    }

    for subject in merged_commit_subjects {
        if let Some(n) = improvement_from_commit_subject(subject, branch_prefix) {
            merged_improvements.insert(n);
        }
    }

    let merged_tasks: Vec<&String> = merged_improvements
        .iter()
        .filter_map(|n| task_by_improvement.get(n))
        .collect();
    let merged_tasks_seen = merged_tasks.len();

    let is_merged_equivalent =
        |candidate: &str| -> bool { merged_tasks.iter().any(|task| equivalent(task, candidate)) };

    let mut removed_from_backlog = Vec::new();
    let new_backlog: Vec<String> = backlog
        .iter()
        .filter(|line| {
            if is_merged_equivalent(line) {
                removed_from_backlog.push((*line).clone());
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();

    let mut removed_from_triage = Vec::new();
    let new_triage: Vec<String> = triage
        .iter()
        .filter(|line| {
            if is_merged_equivalent(line) {
                removed_from_triage.push((*line).clone());
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();

    (
        SyncResult {
            merged_tasks_seen,
            removed_from_backlog,
            removed_from_triage,
        },
        new_backlog,
        new_triage,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_unparsable_lines() {
        let content = "{not json}\n{\"event\":\"worker_started\",\"worker\":1,\"improvement\":1,\"task\":\"x\",\"ts\":\"t\"}\n";
        let events = parse_events(content);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn reconciliation_removes_only_the_merged_task() {
        let events = vec![
            Event::WorkerStarted { worker: 1, improvement: 12, task: "Task A".into(), ts: "t".into() },
            Event::MergeCompleted { worker: 1, improvement: 12, branch: "h-012".into(), success: true, ts: "t".into() },
        ];
        let backlog = vec!["Task A".to_owned(), "Task B".to_owned()];
        let triage: Vec<String> = vec![];
        let (result, new_backlog, new_triage) =
            sync_from_log(&events, &[], "harness-improvement", &backlog, &triage);
        assert_eq!(result.removed_from_backlog, vec!["Task A".to_owned()]);
        assert_eq!(new_backlog, vec!["Task B".to_owned()]);
        assert!(new_triage.is_empty());
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let events = vec![
            Event::WorkerStarted { worker: 1, improvement: 12, task: "Task A".into(), ts: "t".into() },
            Event::MergeCompleted { worker: 1, improvement: 12, branch: "h-012".into(), success: true, ts: "t".into() },
        ];
        let backlog = vec!["Task A".to_owned(), "Task B".to_owned()];
        let (_, new_backlog, new_triage) = sync_from_log(&events, &[], "harness-improvement", &backlog, &[]);
        let (result2, new_backlog2, new_triage2) =
            sync_from_log(&events, &[], "harness-improvement", &new_backlog, &new_triage);
        assert!(result2.removed_from_backlog.is_empty());
        assert!(result2.removed_from_triage.is_empty());
        assert_eq!(new_backlog2, new_backlog);
        assert_eq!(new_triage2, new_triage);
    }

    #[test]
    fn commit_subject_matches_current_and_legacy_markers() {
        assert_eq!(improvement_from_commit_subject("merge harness-improvement-042", "harness-improvement"), Some(42));
        assert_eq!(improvement_from_commit_subject("harness: improvement #7", "harness-improvement"), Some(7));
    }

    #[test]
    fn merge_commit_without_log_event_still_reconciles() {
        // Out-of-band merge: no worker_started event recorded for improvement 5,
        // so even though the commit subject matches, there is no task text to
        // remove (nothing to do — can't invent the text).
        let subjects = vec!["Merge branch harness-improvement-005".to_owned()];
        let (result, new_backlog, _) = sync_from_log(&[], &subjects, "harness-improvement", &["Task C".into()], &[]);
        assert_eq!(result.merged_tasks_seen, 0);
        assert_eq!(new_backlog, vec!["Task C".to_owned()]);
    }
}
