//! Command-line flags (spec §6).

use std::path::PathBuf;

use clap::Parser;

/// Ralph — an autonomous code-improvement supervisor.
///
/// Drives AI coding agents through a repeating plan/implement/push/review/
/// merge pipeline inside isolated git worktrees, producing a stream of
/// merged pull requests against main. Seed `backlog.md`/`triage.md` with
/// tasks, or pass one with `--task` for a one-shot run.
#[derive(Parser, Debug)]
#[command(name = "ralph")]
#[command(version, about)]
pub struct Cli {
    /// Stop after N shipped improvements; absent runs until all queues drain.
    #[arg(long)]
    pub target: Option<u64>,

    /// Run a single one-shot task instead of draining the backlog. Forces
    /// `--parallelism 1` and never reads or writes the task files.
    #[arg(long)]
    pub task: Option<String>,

    /// Number of worker slots.
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Prefix used for branch names and PR titles, e.g. `<prefix>-007`.
    #[arg(long = "branch-prefix")]
    pub branch_prefix: Option<String>,

    /// Per-step turn budget passed through to the agent backend.
    #[arg(long = "max-turns")]
    pub max_turns: Option<u32>,

    /// Emit debug-level logs.
    #[arg(long)]
    pub verbose: bool,

    /// JSON config file; see the crate-level docs for the precedence chain
    /// between this, the flags above, and hard defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
}
