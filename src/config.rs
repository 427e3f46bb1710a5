//! Resolved run configuration (spec §6): merges CLI flags, an optional JSON
//! config file, and hard defaults via the documented precedence chain:
//! step-CLI > global-CLI > step-file > global-file > inferred > hard default.
//!
//! There is currently no per-step CLI flag (the CLI only exposes global
//! `--max-turns` etc., per spec §6's flag list), so the step-CLI tier is
//! always empty in practice; it is still threaded through
//! [`resolve_agent`] so adding one later doesn't change the precedence
//! logic, only which tier supplies a value.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("parsing config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

/// One step's backend/model override (spec §6 `agents.{step}.{backend,model}`).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub backend: Option<String>,
    pub model: Option<String>,
}

/// Per-step agent overrides (spec §6).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepAgentSpecs {
    #[serde(default)]
    pub backlog: AgentSpec,
    #[serde(default)]
    pub plan: AgentSpec,
    #[serde(default)]
    pub implement: AgentSpec,
    #[serde(default)]
    pub review: AgentSpec,
}

/// The shape of `--config <path>` (spec §6: "same keys as CLI plus
/// `minReviewCycles`, `maxReviewCycles`, `agent`, and per-step
/// `agents.{backlog,plan,implement,review}.{backend,model}`").
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub target: Option<u64>,
    pub parallelism: Option<usize>,
    #[serde(rename = "branchPrefix")]
    pub branch_prefix: Option<String>,
    #[serde(rename = "maxTurns")]
    pub max_turns: Option<u32>,
    #[serde(rename = "minReviewCycles")]
    pub min_review_cycles: Option<u32>,
    #[serde(rename = "maxReviewCycles")]
    pub max_review_cycles: Option<u32>,
    #[serde(default)]
    pub agent: AgentSpec,
    #[serde(default)]
    pub agents: StepAgentSpecs,
}

impl FileConfig {
    /// Load from `path`; a missing file is not an error — it resolves to
    /// all-default, matching the rest of the precedence chain's "absent
    /// tier" behavior.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path: path.display().to_string(), source }),
        }
    }
}

/// A pipeline step, for per-step agent resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Backlog,
    Plan,
    Implement,
    Review,
}

impl Step {
    fn spec<'a>(self, specs: &'a StepAgentSpecs) -> &'a AgentSpec {
        match self {
            Self::Backlog => &specs.backlog,
            Self::Plan => &specs.plan,
            Self::Implement => &specs.implement,
            Self::Review => &specs.review,
        }
    }
}

const DEFAULT_PARALLELISM: usize = 2;
const DEFAULT_BRANCH_PREFIX: &str = "harness-improvement";
const DEFAULT_MAX_TURNS: u32 = 100;
const DEFAULT_MIN_REVIEW_CYCLES: u32 = 1;
const DEFAULT_MAX_REVIEW_CYCLES: u32 = 3;
const DEFAULT_BACKEND: &str = "claude";

/// A fully resolved backend/model pair (spec §6 inference rule: a model
/// name containing "codex" or "gpt" implies the codex backend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAgent {
    pub backend: String,
    pub model: Option<String>,
}

fn infer_backend(model: Option<&str>) -> String {
    match model {
        Some(m) if m.to_lowercase().contains("codex") || m.to_lowercase().contains("gpt") => "codex".to_owned(),
        _ => DEFAULT_BACKEND.to_owned(),
    }
}

/// Resolve one step's agent through the five-tier precedence chain.
/// `step_cli` is always `None` today (see module docs) but kept explicit
/// so the tier ordering is visible at the call site.
#[must_use]
pub fn resolve_agent(step_cli: Option<&AgentSpec>, global_cli: Option<&str>, file: &FileConfig, step: Step) -> ResolvedAgent {
    let step_file = step.spec(&file.agents);
    let global_file = &file.agent;

    let backend = step_cli
        .and_then(|s| s.backend.clone())
        .or_else(|| global_cli.map(ToOwned::to_owned))
        .or_else(|| step_file.backend.clone())
        .or_else(|| global_file.backend.clone());

    let model = step_cli
        .and_then(|s| s.model.clone())
        .or_else(|| step_file.model.clone())
        .or_else(|| global_file.model.clone());

    let backend = backend.unwrap_or_else(|| infer_backend(model.as_deref()));
    ResolvedAgent { backend, model }
}

/// The orchestrator's fully resolved run parameters.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub target: Option<u64>,
    pub task: Option<String>,
    pub parallelism: usize,
    pub branch_prefix: String,
    pub max_turns: u32,
    pub min_review_cycles: u32,
    pub max_review_cycles: u32,
    pub verbose: bool,
    pub file: FileConfig,
}

impl RunConfig {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let mut parallelism = cli.parallelism.or(file.parallelism).unwrap_or(DEFAULT_PARALLELISM);
        if cli.task.is_some() {
            // CLI mode pins parallelism to 1 (spec §4.7.3).
            parallelism = 1;
        }

        Ok(Self {
            target: cli.target,
            task: cli.task.clone(),
            parallelism,
            branch_prefix: cli.branch_prefix.clone().or(file.branch_prefix.clone()).unwrap_or_else(|| DEFAULT_BRANCH_PREFIX.to_owned()),
            max_turns: cli.max_turns.or(file.max_turns).unwrap_or(DEFAULT_MAX_TURNS),
            min_review_cycles: file.min_review_cycles.unwrap_or(DEFAULT_MIN_REVIEW_CYCLES),
            max_review_cycles: file.max_review_cycles.unwrap_or(DEFAULT_MAX_REVIEW_CYCLES),
            verbose: cli.verbose,
            file,
        })
    }

    #[must_use]
    pub fn resolve_agent(&self, step: Step) -> ResolvedAgent {
        resolve_agent(None, None, &self.file, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_resolves_to_defaults() {
        let cli = Cli { target: None, task: None, parallelism: None, branch_prefix: None, max_turns: None, verbose: false, config: None };
        let cfg = RunConfig::resolve(&cli).unwrap();
        assert_eq!(cfg.parallelism, DEFAULT_PARALLELISM);
        assert_eq!(cfg.branch_prefix, DEFAULT_BRANCH_PREFIX);
    }

    #[test]
    fn cli_task_pins_parallelism_to_one() {
        let cli = Cli {
            target: None,
            task: Some("do a thing".into()),
            parallelism: Some(8),
            branch_prefix: None,
            max_turns: None,
            verbose: false,
            config: None,
        };
        let cfg = RunConfig::resolve(&cli).unwrap();
        assert_eq!(cfg.parallelism, 1);
    }

    #[test]
    fn cli_overrides_file_overrides_inference_overrides_default() {
        let mut file = FileConfig::default();
        file.agent.model = Some("gpt-4o".into());
        let resolved = resolve_agent(None, None, &file, Step::Plan);
        assert_eq!(resolved.backend, "codex");

        let resolved = resolve_agent(None, Some("claude"), &file, Step::Plan);
        assert_eq!(resolved.backend, "claude");
    }

    #[test]
    fn step_file_override_wins_over_global_file() {
        let mut file = FileConfig::default();
        file.agent.backend = Some("claude".into());
        file.agents.review.backend = Some("codex".into());
        assert_eq!(resolve_agent(None, None, &file, Step::Review).backend, "codex");
        assert_eq!(resolve_agent(None, None, &file, Step::Plan).backend, "claude");
    }
}
