//! The worker pipeline (spec §4.6, C6): one improvement's pass through
//! `Prepare → Plan → Implement → Published → Review loop → Agent-merge →
//! Post-merge recovery`.

use std::fs;
use std::path::{Path, PathBuf};

use ralph_agent::{StepParams, StepResult, run_step};
use ralph_core::backlog::{MERGE_CONFLICT_TRIAGE_PREFIX, OUTSTANDING_PR_TRIAGE_PREFIX};
use ralph_core::clock::now_rfc3339;
use ralph_core::eventlog::{Event, EventLog};
use ralph_core::outcome::{FailureContext, StepSummary, WorkerOutcome};
use ralph_core::task::{Improvement, Task};
use ralph_core::title::build_title;
use ralph_proc::worktree::{create_or_resume, has_new_commits};
use ralph_proc::{CancellationToken, pr, run, validator};

use crate::config::{ResolvedAgent, RunConfig, Step as AgentStep};
use crate::paths::RalphPaths;

pub struct WorkerParams<'a> {
    pub slot: u32,
    pub improvement: Improvement,
    pub task: Task,
    pub repo_root: &'a Path,
    pub worktree_path: PathBuf,
    pub branch: String,
    pub config: &'a RunConfig,
    pub cancel: &'a CancellationToken,
    pub log: &'a EventLog,
    pub validator_argv: &'a [&'a str],
}

fn agent_argv(agent: &ResolvedAgent, max_turns: u32) -> Vec<String> {
    let mut argv = vec![agent.backend.clone(), "--max-turns".to_owned(), max_turns.to_string()];
    if let Some(model) = &agent.model {
        argv.push("--model".to_owned());
        argv.push(model.clone());
    }
    argv
}

fn run_one_step(p: &WorkerParams<'_>, step: AgentStep, step_name: &str, prompt: &str) -> StepResult {
    let agent = p.config.resolve_agent(step);
    let argv_owned = agent_argv(&agent, p.config.max_turns);
    let argv: Vec<&str> = argv_owned.iter().map(String::as_str).collect();
    let params = StepParams {
        prompt,
        step: step_name,
        backend: &agent.backend,
        improvement: p.improvement.get(),
        cwd: &p.worktree_path,
        argv: &argv,
        cancel: p.cancel,
    };
    run_step(&params, p.log).unwrap_or_default()
}

fn extract_marked_line<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.lines().find_map(|l| l.strip_prefix(marker)).map(str::trim)
}

fn fail_ctx(task: &Task, branch: &str, worktree_path: &Path) -> FailureContext {
    FailureContext {
        task: task.clone(),
        branch: branch.to_owned(),
        worktree_path: worktree_path.display().to_string(),
        pr_number: None,
    }
}

fn fail_ctx_with_pr(task: &Task, branch: &str, worktree_path: &Path, pr_number: u64) -> FailureContext {
    FailureContext {
        task: task.clone(),
        branch: branch.to_owned(),
        worktree_path: worktree_path.display().to_string(),
        pr_number: Some(pr_number),
    }
}

/// Run one improvement end to end. Never panics: every failure path
/// returns a [`WorkerOutcome`] variant instead.
pub fn run_worker(p: WorkerParams<'_>) -> WorkerOutcome {
    let mut steps: Vec<StepSummary> = Vec::new();
    let is_merge_conflict_triage = p.task.text.starts_with(MERGE_CONFLICT_TRIAGE_PREFIX);
    let is_outstanding_pr_triage = p.task.text.starts_with(OUTSTANDING_PR_TRIAGE_PREFIX);

    // 1. Prepare.
    let resume = match create_or_resume(p.repo_root, &p.worktree_path, &p.branch) {
        Ok(r) => r,
        Err(e) => {
            return WorkerOutcome::Generic {
                improvement: p.improvement,
                ctx: fail_ctx(&p.task, &p.branch, &p.worktree_path),
                reason: format!("worktree preparation failed: {e}"),
            };
        }
    };

    // 2. Plan.
    let plan_summary = plan_step(&p, resume.resumed, is_merge_conflict_triage, is_outstanding_pr_triage, &mut steps);

    // 3. Implement.
    let implement_result = implement_step(&p, is_merge_conflict_triage, is_outstanding_pr_triage, plan_summary.as_deref(), &mut steps);
    let commit_body = implement_result.and_then(|r| extract_marked_line(&r.output_text, "DONE:").map(str::to_owned));

    // 4. Commit + detect no-op.
    let title = build_title(plan_summary.as_deref(), Some(&p.task.text), p.improvement.get());
    let _ = run(&["git", "checkout", "--", "backlog.md"], &p.worktree_path);
    let _ = run(&["git", "add", "-A"], &p.worktree_path);
    let commit_message = format!("{title}\n\n{}", commit_body.unwrap_or_default());
    let commit_out = run(&["git", "commit", "-m", &commit_message], &p.worktree_path);
    let committed_now = commit_out.is_ok_and(|o| o.success);
    let has_commits = has_new_commits(&p.worktree_path);

    if !committed_now && !has_commits {
        let is_sentinel = p.task.text == ralph_core::acquire::MAIN_NOT_GREEN_SENTINEL;
        if is_sentinel && validator::is_green(p.validator_argv, p.repo_root) {
            return WorkerOutcome::Shipped { improvement: p.improvement, task: p.task, steps };
        }
        return WorkerOutcome::NoChanges { improvement: p.improvement, ctx: fail_ctx(&p.task, &p.branch, &p.worktree_path) };
    }

    // 5. Publish.
    if !pr::push(&p.worktree_path, &p.branch) {
        return WorkerOutcome::Generic {
            improvement: p.improvement,
            ctx: fail_ctx(&p.task, &p.branch, &p.worktree_path),
            reason: "push failed".to_owned(),
        };
    }
    let Some(pull_request) = pr::ensure_pr(&p.worktree_path, &p.branch, &title, commit_message.trim()) else {
        return WorkerOutcome::Generic {
            improvement: p.improvement,
            ctx: fail_ctx(&p.task, &p.branch, &p.worktree_path),
            reason: "failed to create or find PR".to_owned(),
        };
    };
    let _ = p.log.append(&Event::MergeQueued {
        worker: p.slot,
        improvement: p.improvement.get(),
        branch: p.branch.clone(),
        ts: now_rfc3339(),
    });

    // 6. Review loop.
    let review_outcome = review_loop(&p, pull_request.number, p.config.min_review_cycles, p.config.max_review_cycles, &mut steps);
    if !review_outcome {
        return WorkerOutcome::ReviewFailed {
            improvement: p.improvement,
            ctx: fail_ctx_with_pr(&p.task, &p.branch, &p.worktree_path, pull_request.number),
        };
    }

    // 7. Agent-merge.
    let merge_prompt = format!("Merge PR #{} for branch {}.", pull_request.number, p.branch);
    let merge_result = run_one_step(&p, AgentStep::Review, "merge", &merge_prompt);
    steps.push(StepSummary {
        step: "merge".to_owned(),
        backend: p.config.resolve_agent(AgentStep::Review).backend,
        turns: merge_result.turns,
        cost_usd: merge_result.cost_usd,
        input_tokens: merge_result.input_tokens,
        output_tokens: merge_result.output_tokens,
        duration_ms: 0,
    });

    let shipped_on_first_try = pr::read_merge_state(&p.worktree_path, pull_request.number).is_some_and(|pr| pr.is_shipped());
    let shipped = shipped_on_first_try
        || post_merge_recovery(&p, pull_request.number, p.config.max_review_cycles, &mut steps);

    let _ = p.log.append(&Event::MergeCompleted {
        worker: p.slot,
        improvement: p.improvement.get(),
        branch: p.branch.clone(),
        success: shipped,
        ts: now_rfc3339(),
    });

    if shipped {
        return WorkerOutcome::Shipped { improvement: p.improvement, task: p.task, steps };
    }

    WorkerOutcome::MergeFailed {
        improvement: p.improvement,
        ctx: fail_ctx_with_pr(&p.task, &p.branch, &p.worktree_path, pull_request.number),
    }
}

fn plan_skipped_for_named_plan(task_text: &str, worktree_path: &Path) -> bool {
    task_text.strip_prefix("Implement Plan ").is_some_and(|slug| RalphPaths::named_plan_doc(worktree_path, slug.trim()).exists())
}

fn plan_step(
    p: &WorkerParams<'_>,
    resumed: bool,
    is_merge_conflict_triage: bool,
    is_outstanding_pr_triage: bool,
    steps: &mut Vec<StepSummary>,
) -> Option<String> {
    if resumed || is_merge_conflict_triage || is_outstanding_pr_triage || plan_skipped_for_named_plan(&p.task.text, &p.worktree_path) {
        return None;
    }

    let prompt = format!("PLAN: produce a plan for: {}", p.task.text);
    let result = run_one_step(p, AgentStep::Plan, "plan", &prompt);
    steps.push(step_summary("plan", p, &result));

    let plan_doc = RalphPaths::plan_doc(&p.worktree_path);
    let content = fs::read_to_string(&plan_doc).ok()?;
    extract_marked_line(&content, "PLAN:").map(str::to_owned)
}

fn implement_step(
    p: &WorkerParams<'_>,
    is_merge_conflict_triage: bool,
    is_outstanding_pr_triage: bool,
    plan_summary: Option<&str>,
    steps: &mut Vec<StepSummary>,
) -> Option<StepResult> {
    let prompt = if is_outstanding_pr_triage {
        format!("Recover and merge the outstanding PR: {}", p.task.text)
    } else if is_merge_conflict_triage {
        format!("Resolve the merge conflict: {}", p.task.text)
    } else {
        format!("Implement the plan: {}", plan_summary.unwrap_or(&p.task.text))
    };

    let mut result = run_one_step(p, AgentStep::Implement, "implement", &prompt);
    if !result.success {
        result = run_one_step(p, AgentStep::Implement, "implement", &prompt);
    }
    steps.push(step_summary("implement", p, &result));
    Some(result)
}

fn step_summary(name: &str, p: &WorkerParams<'_>, result: &StepResult) -> StepSummary {
    let step = match name {
        "plan" => AgentStep::Plan,
        "implement" => AgentStep::Implement,
        _ => AgentStep::Review,
    };
    StepSummary {
        step: name.to_owned(),
        backend: p.config.resolve_agent(step).backend,
        turns: result.turns,
        cost_usd: result.cost_usd,
        input_tokens: result.input_tokens,
        output_tokens: result.output_tokens,
        duration_ms: 0,
    }
}

/// Returns `true` once the review is considered passed (spec §4.6.1 step 6;
/// "`REVIEW_PASSED` wins" per the documented resolution of the
/// ambiguous-substring open question). A push failure after a fix is
/// terminal and ends the loop early rather than burning the remaining
/// cycle budget.
fn review_loop(p: &WorkerParams<'_>, pr_number: u64, min_cycles: u32, max_cycles: u32, steps: &mut Vec<StepSummary>) -> bool {
    for cycle in 1..=max_cycles {
        let prompt = format!("Review PR #{pr_number}.");
        let result = run_one_step(p, AgentStep::Review, "review", &prompt);
        steps.push(step_summary("review", p, &result));

        let passed = result.output_text.contains("REVIEW_PASSED");
        let failed = !passed && result.output_text.contains("REVIEW_FAILED");

        if passed {
            if cycle >= min_cycles {
                return true;
            }
            continue;
        }
        if failed {
            if !run_fix_and_push(p, &format!("Address review feedback: {}", result.output_text), steps) {
                return false;
            }
            continue;
        }
        if validator::is_green(p.validator_argv, &p.worktree_path) {
            return true;
        }
        if !run_fix_and_push(p, "Fix the validator failure.", steps) {
            return false;
        }
    }
    false
}

/// Runs the fix agent, commits, and pushes. Returns `false` on push
/// failure, which the caller treats as terminal (spec §4.6.1 step 6
/// "push failure is terminal").
fn run_fix_and_push(p: &WorkerParams<'_>, prompt: &str, steps: &mut Vec<StepSummary>) -> bool {
    let result = run_one_step(p, AgentStep::Implement, "fix", prompt);
    steps.push(step_summary("fix", p, &result));
    let _ = run(&["git", "add", "-A"], &p.worktree_path);
    let _ = run(&["git", "commit", "-m", "fix: address review feedback"], &p.worktree_path);
    pr::push(&p.worktree_path, &p.branch)
}

/// Post-merge recovery (spec §4.6.1 step 8): bounded loop extending the
/// same review-cycle budget, retrying the merge agent after every review
/// pass or fix.
fn post_merge_recovery(p: &WorkerParams<'_>, pr_number: u64, max_cycles: u32, steps: &mut Vec<StepSummary>) -> bool {
    for _ in 1..=max_cycles {
        if p.cancel.is_cancelled() {
            return false;
        }
        let review_prompt = format!("Review outstanding merge for PR #{pr_number}.");
        let result = run_one_step(p, AgentStep::Review, "review", &review_prompt);
        steps.push(step_summary("review", p, &result));

        let passed = result.output_text.contains("REVIEW_PASSED");
        let failed = !passed && result.output_text.contains("REVIEW_FAILED");

        if !passed {
            if failed || !validator::is_green(p.validator_argv, &p.worktree_path) {
                run_fix_and_push(p, "Resolve what is blocking the merge.", steps);
            }
        }

        let merge_prompt = format!("Retry merge for PR #{pr_number}.");
        let merge_result = run_one_step(p, AgentStep::Review, "merge", &merge_prompt);
        steps.push(step_summary("merge", p, &merge_result));

        if pr::read_merge_state(&p.worktree_path, pr_number).is_some_and(|pr| pr.is_shipped()) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_marked_line_finds_prefixed_line() {
        let text = "some preamble\nPLAN: do the thing\nmore text";
        assert_eq!(extract_marked_line(text, "PLAN:"), Some("do the thing"));
    }

    #[test]
    fn extract_marked_line_none_when_absent() {
        assert_eq!(extract_marked_line("no markers here", "DONE:"), None);
    }

    #[test]
    fn plan_skipped_for_named_plan_false_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!plan_skipped_for_named_plan("Implement Plan foo", dir.path()));
    }

    #[test]
    fn plan_skipped_for_named_plan_true_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let plan_dir = dir.path().join("thoughts/shared/plans/active");
        fs::create_dir_all(&plan_dir).unwrap();
        fs::write(plan_dir.join("foo.md"), "# plan").unwrap();
        assert!(plan_skipped_for_named_plan("Implement Plan foo", dir.path()));
    }
}
