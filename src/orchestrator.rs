//! The scheduling loop (spec §4.7, C7): acquires tasks, spawns worker
//! threads, fans their results back in, and routes each outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use ralph_agent::{StepParams, run_step};
use ralph_core::Improvement;
use ralph_core::acquire::{MAIN_NOT_GREEN_SENTINEL, acquire};
use ralph_core::backlog::{MergeConflictArchive, TaskFile, human_escalation_text, merge_conflict_triage_text, outstanding_pr_triage_text};
use ralph_core::clock::now_epoch_secs;
use ralph_core::eventlog::{Event, EventLog, sync_from_log};
use ralph_core::outcome::WorkerOutcome;
use ralph_core::refill::normalize_backlog;
use ralph_core::scheduler_state::SchedulerState;
use ralph_core::task::{Task, TaskSource};
use ralph_proc::pr::list_open_by_prefix;
use ralph_proc::worktree::cleanup;
use ralph_proc::{CancellationToken, install_signal_handlers, run};

use crate::config::{RunConfig, Step};
use crate::paths::RalphPaths;
use crate::worker::{WorkerParams, run_worker};

/// How long the main-not-green sentinel is deferred after it fails to
/// produce a fix, to avoid thrashing against a still-broken `main` (spec
/// §4.7.5).
const MAIN_NOT_GREEN_COOLDOWN_SECS: i64 = 15 * 60;
const SCHEDULING_PACE: Duration = Duration::from_secs(2);

pub struct Orchestrator {
    repo_root: PathBuf,
    paths: RalphPaths,
    config: RunConfig,
    cancel: CancellationToken,
    log: EventLog,
    validator_argv: Vec<String>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(repo_root: PathBuf, paths: RalphPaths, config: RunConfig, cancel: CancellationToken, validator_argv: Vec<String>) -> Self {
        let log = EventLog::new(paths.event_log());
        Self { repo_root, paths, config, cancel, log, validator_argv }
    }

    /// Run to completion; returns the process exit code.
    pub fn run(&self) -> i32 {
        if let Err(code) = self.startup() {
            return code;
        }

        if let Some(task_text) = self.config.task.clone() {
            return self.run_single_task(task_text);
        }

        self.run_queue_loop()
    }

    fn backlog_file(&self) -> TaskFile {
        TaskFile::new(self.paths.backlog())
    }

    fn triage_file(&self) -> TaskFile {
        TaskFile::new(self.paths.triage())
    }

    fn merge_conflict_archive(&self) -> MergeConflictArchive {
        MergeConflictArchive::new(self.paths.merge_conflicts())
    }

    fn required_binaries(&self) -> Vec<String> {
        let mut bins = vec!["git".to_owned(), "gh".to_owned()];
        for step in [Step::Backlog, Step::Plan, Step::Implement, Step::Review] {
            bins.push(self.config.resolve_agent(step).backend);
        }
        bins.sort();
        bins.dedup();
        bins
    }

    fn startup(&self) -> Result<(), i32> {
        for bin in self.required_binaries() {
            if !binary_on_path(&bin) {
                tracing::error!(binary = %bin, "required binary not found on PATH");
                return Err(1);
            }
        }

        self.run_sync_from_log();
        self.import_outstanding_prs();

        tracing::info!(
            target = ?self.config.target,
            parallelism = self.config.parallelism,
            branch_prefix = %self.config.branch_prefix,
            "ralph starting"
        );

        if let Err(e) = install_signal_handlers(self.cancel.clone()) {
            tracing::warn!(error = %e, "failed to install signal handlers");
        }

        Ok(())
    }

    fn merged_commit_subjects(&self) -> Vec<String> {
        run(&["git", "log", "main", "--pretty=%s"], &self.repo_root)
            .ok()
            .filter(|o| o.success)
            .map(|o| o.stdout.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// `syncFromLog` (spec §4.4): reconcile task files against the event
    /// log and main's merge history.
    fn run_sync_from_log(&self) {
        let events = self.log.read_all().unwrap_or_default();
        let subjects = self.merged_commit_subjects();
        let backlog = self.backlog_file().read().unwrap_or_default();
        let triage = self.triage_file().read().unwrap_or_default();
        let (result, new_backlog, new_triage) = sync_from_log(&events, &subjects, &self.config.branch_prefix, &backlog, &triage);

        if !result.removed_from_backlog.is_empty() {
            let _ = self.backlog_file().write(&new_backlog);
        }
        if !result.removed_from_triage.is_empty() {
            let _ = self.triage_file().write(&new_triage);
        }
        if result.merged_tasks_seen > 0 {
            tracing::info!(
                removed_backlog = result.removed_from_backlog.len(),
                removed_triage = result.removed_from_triage.len(),
                "syncFromLog reconciled merged tasks"
            );
        }
    }

    /// Import any pre-existing open PRs under our branch prefix as triage
    /// tasks (spec §4.7.1); idempotent via `add_if_absent`.
    fn import_outstanding_prs(&self) {
        let Ok(open_prs) = list_open_by_prefix(&self.repo_root, &self.config.branch_prefix) else {
            return;
        };
        let triage = self.triage_file();
        for pr in open_prs {
            let text = outstanding_pr_triage_text(pr.number, &pr.head_ref_name, &pr.url);
            let _ = triage.add_if_absent(&text);
        }
    }

    fn has_more_work(&self, completed: u64, triage_count: usize, backlog_count: usize, in_flight_count: usize) -> bool {
        if let Some(target) = self.config.target {
            completed < target
        } else {
            triage_count > 0 || backlog_count > 0 || in_flight_count > 0
        }
    }

    fn remove_task(&self, task: &Task) {
        match task.source {
            TaskSource::Backlog => {
                let _ = self.backlog_file().remove_by_text(&task.text);
            }
            TaskSource::Triage => {
                let _ = self.triage_file().remove_by_text(&task.text);
            }
            TaskSource::Cli => {}
        }
    }

    fn escalate_merge_conflict(&self, improvement: u64, branch: &str, worktree_path: &str, original_task: &str) {
        let _ = self.merge_conflict_archive().append_if_absent(improvement, branch, worktree_path, original_task);
        let text = merge_conflict_triage_text(improvement, branch, worktree_path, original_task);
        let _ = self.triage_file().add_if_absent(&text);
    }

    /// Backlog refill (spec §4.7.4). Returns `false` when the backlog is
    /// still empty after the refill agent and normalization pass run,
    /// meaning there is genuinely nothing left to do.
    fn ensure_backlog(&self) -> bool {
        let agent = self.config.resolve_agent(Step::Backlog);
        let argv_owned = vec![agent.backend.clone(), "--max-turns".to_owned(), self.config.max_turns.to_string()];
        let argv: Vec<&str> = argv_owned.iter().map(String::as_str).collect();
        let prompt = "The backlog and triage queues are empty. Propose a small batch of concrete, \
                       scoped improvement tasks for this repository and write them to backlog.md, \
                       one `- <task>` per line.";

        let params = StepParams {
            prompt,
            step: "backlog",
            backend: &agent.backend,
            improvement: 0,
            cwd: &self.repo_root,
            argv: &argv,
            cancel: &self.cancel,
        };
        if let Err(e) = run_step(&params, &self.log) {
            tracing::warn!(error = %e, "backlog refill step failed to log");
        }

        let backlog_file = self.backlog_file();
        let tasks = backlog_file.read().unwrap_or_default();
        let suppressed = read_suppressed_eslint_rules(&self.repo_root);
        let normalized = normalize_backlog(&tasks, &suppressed);
        if normalized != tasks {
            let _ = backlog_file.write(&normalized);
        }
        !normalized.is_empty()
    }

    /// One-shot `--task` mode (spec §4.7.3): parallelism pinned to 1, the
    /// task is never read from or written back to the backlog/triage
    /// files. Still routes through `route_outcome` so a shipped task's
    /// worktree is reclaimed exactly like a queue-driven one.
    fn run_single_task(&self, task_text: String) -> i32 {
        let improvement = Improvement::new(1);
        let task = Task::new(task_text, TaskSource::Cli);
        let worktree_path = self.paths.worktree_path(&improvement.branch_name(&self.config.branch_prefix)).display().to_string();
        let mut state = SchedulerState::new(1);
        state.start_worker(0, improvement, task.clone(), worktree_path);

        let (tx, rx) = unbounded();
        let handle = self.spawn_worker(0, improvement, task, tx);
        let received = rx.recv().ok();
        let _ = handle.join();

        let Some((worker_id, outcome)) = received else {
            return 1;
        };
        let shipped = matches!(outcome, WorkerOutcome::Shipped { .. });
        self.route_outcome(&mut state, worker_id, outcome);
        if shipped { 0 } else { 1 }
    }

    fn spawn_worker(&self, worker_id: u32, improvement: Improvement, task: Task, tx: Sender<(u32, WorkerOutcome)>) -> JoinHandle<()> {
        let branch = improvement.branch_name(&self.config.branch_prefix);
        let worktree_path = self.paths.worktree_path(&branch);
        let repo_root = self.repo_root.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let log = self.log.clone();
        let validator_argv = self.validator_argv.clone();

        let _ = log.append(&Event::WorkerStarted {
            worker: worker_id,
            improvement: improvement.get(),
            task: task.text.clone(),
            ts: ralph_core::clock::now_rfc3339(),
        });

        std::thread::spawn(move || {
            let validator_refs: Vec<&str> = validator_argv.iter().map(String::as_str).collect();
            let params = WorkerParams {
                slot: worker_id,
                improvement,
                task,
                repo_root: &repo_root,
                worktree_path,
                branch,
                config: &config,
                cancel: &cancel,
                log: &log,
                validator_argv: &validator_refs,
            };
            let outcome = run_worker(params);
            let _ = log.append(&Event::WorkerFinished {
                worker: worker_id,
                improvement: improvement.get(),
                success: !outcome.is_failure(),
                ts: ralph_core::clock::now_rfc3339(),
            });
            let _ = tx.send((worker_id, outcome));
        })
    }

    /// Route one finished worker's outcome (spec §4.7.5).
    fn route_outcome(&self, state: &mut SchedulerState, worker_id: u32, outcome: WorkerOutcome) {
        let improvement = outcome.improvement();
        match outcome {
            WorkerOutcome::Shipped { task, .. } => {
                self.remove_task(&task);
                state.finish_worker(worker_id, true);
                let worktree_path = self.paths.worktree_path(&improvement.branch_name(&self.config.branch_prefix));
                let _ = cleanup(&self.repo_root, &worktree_path, &improvement.branch_name(&self.config.branch_prefix));
                self.run_sync_from_log();
                let _ = self.log.append(&Event::ImprovementDone {
                    improvement: improvement.get(),
                    total_cost_usd: 0.0,
                    total_duration_ms: 0,
                    ts: ralph_core::clock::now_rfc3339(),
                });
            }
            WorkerOutcome::SucceededWithoutMerge { task, branch, worktree_path, .. } => {
                tracing::warn!(improvement = %improvement, "worker succeeded without an agent-merged PR, escalating");
                self.escalate_merge_conflict(improvement.get(), &branch, &worktree_path, &task.text);
                state.finish_worker(worker_id, false);
            }
            WorkerOutcome::NoChanges { ctx, .. } => {
                if ctx.task.text == MAIN_NOT_GREEN_SENTINEL {
                    state.set_main_not_green_retry_after(now_epoch_secs() + MAIN_NOT_GREEN_COOLDOWN_SECS);
                }
                state.finish_worker(worker_id, false);
                self.log_improvement_failed(improvement.get(), "no_changes");
            }
            WorkerOutcome::ReviewFailed { ctx, .. } => {
                self.remove_task(&ctx.task);
                let text = human_escalation_text(&ctx.task.text, &ctx.worktree_path);
                let _ = self.triage_file().add_if_absent(&text);
                state.finish_worker(worker_id, false);
                self.log_improvement_failed(improvement.get(), "review_failed");
            }
            WorkerOutcome::MergeFailed { ctx, .. } => {
                self.escalate_merge_conflict(improvement.get(), &ctx.branch, &ctx.worktree_path, &ctx.task.text);
                self.remove_task(&ctx.task);
                state.finish_worker(worker_id, false);
                self.log_improvement_failed(improvement.get(), "merge_failed");
            }
            WorkerOutcome::Generic { ctx, reason, .. } => {
                if ctx.pr_number.is_some() {
                    self.escalate_merge_conflict(improvement.get(), &ctx.branch, &ctx.worktree_path, &ctx.task.text);
                    self.remove_task(&ctx.task);
                }
                state.finish_worker(worker_id, false);
                self.log_improvement_failed(improvement.get(), &reason);
            }
        }
    }

    fn log_improvement_failed(&self, improvement: u64, reason: &str) {
        let _ = self.log.append(&Event::ImprovementFailed {
            improvement,
            reason: reason.to_owned(),
            ts: ralph_core::clock::now_rfc3339(),
        });
    }

    fn run_queue_loop(&self) -> i32 {
        let mut state = SchedulerState::new(1);
        let failure_threshold = (u32::try_from(self.config.parallelism).unwrap_or(u32::MAX) + 2).max(3);
        let (tx, rx): (Sender<(u32, WorkerOutcome)>, Receiver<(u32, WorkerOutcome)>) = unbounded();
        let mut handles: HashMap<u32, JoinHandle<()>> = HashMap::new();
        let mut next_worker_id: u32 = 0;
        let mut exit_code = 0;

        'scheduling: loop {
            self.import_outstanding_prs();

            let triage = self.triage_file().read().unwrap_or_default();
            let backlog = self.backlog_file().read().unwrap_or_default();
            let in_flight = state.in_flight_keys().len();
            if !self.has_more_work(state.completed(), triage.len(), backlog.len(), in_flight) || self.cancel.is_cancelled() {
                break;
            }
            if state.failure_threshold_reached(failure_threshold) {
                tracing::error!(threshold = failure_threshold, "consecutive failure threshold reached, stopping");
                break;
            }

            let slots = state.available_slots(self.config.parallelism);
            for _ in 0..slots {
                if self.cancel.is_cancelled() {
                    break 'scheduling;
                }
                let triage = self.triage_file().read().unwrap_or_default();
                let backlog = self.backlog_file().read().unwrap_or_default();
                let task = acquire(&triage, &backlog, state.in_flight_keys(), now_epoch_secs(), state.main_not_green_retry_after());

                let task = match task {
                    Some(t) => t,
                    None if state.active_worker_count() > 0 => break,
                    None if self.ensure_backlog() => continue,
                    None => {
                        tracing::error!("backlog refill produced no tasks and no workers are running");
                        exit_code = 1;
                        break 'scheduling;
                    }
                };

                let improvement = state.take_next_improvement();
                let worker_id = next_worker_id;
                next_worker_id += 1;
                state.start_worker(worker_id, improvement, task.clone(), self.paths.worktree_path(&improvement.branch_name(&self.config.branch_prefix)).display().to_string());
                let handle = self.spawn_worker(worker_id, improvement, task, tx.clone());
                handles.insert(worker_id, handle);
            }

            if state.active_worker_count() == 0 {
                break;
            }

            // 5. Await any worker completion.
            if let Ok((worker_id, outcome)) = rx.recv() {
                if let Some(handle) = handles.remove(&worker_id) {
                    let _ = handle.join();
                }
                self.route_outcome(&mut state, worker_id, outcome);
            }

            std::thread::sleep(SCHEDULING_PACE);
        }

        // Drain remaining in-flight workers and route their results.
        while state.active_worker_count() > 0 {
            let Ok((worker_id, outcome)) = rx.recv() else { break };
            if let Some(handle) = handles.remove(&worker_id) {
                let _ = handle.join();
            }
            self.route_outcome(&mut state, worker_id, outcome);
        }

        tracing::info!(completed = state.completed(), consecutive_failures = state.consecutive_failures(), "ralph finished");
        exit_code
    }
}

fn binary_on_path(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else { return false };
    std::env::split_paths(&path_var).any(|dir| candidate_exists(&dir, name))
}

fn candidate_exists(dir: &Path, name: &str) -> bool {
    let candidate = dir.join(name);
    candidate.is_file()
}

/// Scan the repository for `eslint-disable`/`eslint-disable-next-line`
/// comments and extract the rule names they suppress (spec §4.7.4: the
/// refill normalization pass is "keyed by actually-suppressed rules read
/// from the project's lint config").
fn read_suppressed_eslint_rules(repo_root: &Path) -> Vec<String> {
    let Ok(out) = run(&["git", "grep", "-h", "-E", "eslint-disable"], repo_root) else {
        return Vec::new();
    };
    let mut rules = std::collections::BTreeSet::new();
    for line in out.stdout.lines() {
        let Some(pos) = line.find("eslint-disable") else { continue };
        let rest = &line[pos..];
        let rest = rest
            .trim_start_matches("eslint-disable-next-line")
            .trim_start_matches("eslint-disable-line")
            .trim_start_matches("eslint-disable");
        for token in rest.split([',', '*', '/']) {
            let token = token.trim();
            if token.len() > 2 && token.contains('-') && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '@') {
                rules.insert(token.to_owned());
            }
        }
    }
    rules.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn binary_on_path_finds_a_real_binary() {
        assert!(binary_on_path("sh"));
    }

    #[test]
    fn binary_on_path_rejects_nonexistent() {
        assert!(!binary_on_path("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn orchestrator_has_more_work_respects_target() {
        let cli = crate::cli::Cli { target: Some(2), task: None, parallelism: None, branch_prefix: None, max_turns: None, verbose: false, config: None };
        let config = RunConfig::resolve(&cli).unwrap();
        let dir = tempdir().unwrap();
        let orch = Orchestrator::new(dir.path().to_path_buf(), RalphPaths::new(dir.path()), config, CancellationToken::new(), vec!["true".to_owned()]);
        assert!(orch.has_more_work(1, 0, 0, 0));
        assert!(!orch.has_more_work(2, 5, 5, 5));
    }

    #[test]
    fn orchestrator_has_more_work_without_target_checks_queues() {
        let cli = crate::cli::Cli { target: None, task: None, parallelism: None, branch_prefix: None, max_turns: None, verbose: false, config: None };
        let config = RunConfig::resolve(&cli).unwrap();
        let dir = tempdir().unwrap();
        let orch = Orchestrator::new(dir.path().to_path_buf(), RalphPaths::new(dir.path()), config, CancellationToken::new(), vec!["true".to_owned()]);
        assert!(!orch.has_more_work(0, 0, 0, 0));
        assert!(orch.has_more_work(0, 1, 0, 0));
    }
}
