//! Ralph — an autonomous code-improvement supervisor.
//!
//! Seed a repo's `backlog.md`/`triage.md` with tasks (or pass `--task` for
//! a one-shot run) and ralph drives an AI coding agent through a repeating
//! plan → implement → push → review → merge pipeline inside isolated git
//! worktrees, producing a stream of merged pull requests against main.
//!
//! Run it from the root of the repo you want improved; it expects `git`
//! and `gh` on `PATH`, plus whichever agent backend your config resolves
//! to for each step.

mod cli;
mod config;
mod orchestrator;
mod paths;
mod telemetry;
mod worker;

use clap::Parser;
use ralph_proc::CancellationToken;

use cli::Cli;
use config::RunConfig;
use orchestrator::Orchestrator;
use paths::RalphPaths;

/// Project-local validator command (spec §4.1 "opaque project-local
/// command"); ralph has no flag for this today, so it's a fixed default
/// rather than something pulled from config. See DESIGN.md.
const DEFAULT_VALIDATOR_ARGV: &[&str] = &["validate"];

fn main() {
    let cli = Cli::parse();

    let config = match RunConfig::resolve(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ralph: {err}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.verbose);

    let repo_root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            tracing::error!(error = %err, "failed to determine current directory");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let paths = RalphPaths::new(repo_root.join(".ralph"));
    let validator_argv: Vec<String> = DEFAULT_VALIDATOR_ARGV.iter().map(|s| (*s).to_owned()).collect();
    let orchestrator = Orchestrator::new(repo_root, paths, config, cancel, validator_argv);

    std::process::exit(orchestrator.run());
}
