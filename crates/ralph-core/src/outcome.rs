//! `WorkerOutcome` — the tagged result a worker hands back to the
//! orchestrator for routing (spec §4.6.3, §9 "Worker result routing").

use crate::task::{Improvement, Task};

/// Per-step accounting accumulated by the agent invoker (spec §3
/// `StepSummary`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepSummary {
    pub step: String,
    pub backend: String,
    pub turns: u32,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// Context carried by every failure outcome so the orchestrator can route
/// it without re-deriving state (spec §4.6.3).
#[derive(Clone, Debug, PartialEq)]
pub struct FailureContext {
    pub task: Task,
    pub branch: String,
    pub worktree_path: String,
    pub pr_number: Option<u64>,
}

/// The terminal result of one worker run (spec §4.6.1 states,
/// §4.6.3 taxonomy, §4.7.5 routing).
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerOutcome {
    /// Agent-merge succeeded; `mergedAt != null` was observed.
    Shipped {
        improvement: Improvement,
        task: Task,
        steps: Vec<StepSummary>,
    },
    /// Worker reported success but the PR was never actually merged — an
    /// orchestrator-side anomaly, not a normal terminal state, so it is
    /// still modeled as an outcome the orchestrator must route (escalate).
    SucceededWithoutMerge {
        improvement: Improvement,
        task: Task,
        branch: String,
        worktree_path: String,
    },
    /// The task produced no commits and was not the green-sentinel no-op
    /// case (spec §4.6.1 step 4, §7).
    NoChanges { improvement: Improvement, ctx: FailureContext },
    /// Review exceeded `maxReviewCycles` (spec §4.6.1 step 6).
    ReviewFailed { improvement: Improvement, ctx: FailureContext },
    /// Agent-merge and post-merge recovery both failed to ship the PR
    /// (spec §4.6.1 step 8).
    MergeFailed { improvement: Improvement, ctx: FailureContext },
    /// Worktree preparation, planning, implementation, or publish failed
    /// (spec §4.6.1 steps 1, 2, 3, 5; §7 generic failure).
    Generic { improvement: Improvement, ctx: FailureContext, reason: String },
}

impl WorkerOutcome {
    /// The improvement number this outcome is for.
    #[must_use]
    pub const fn improvement(&self) -> Improvement {
        match self {
            Self::Shipped { improvement, .. }
            | Self::SucceededWithoutMerge { improvement, .. }
            | Self::NoChanges { improvement, .. }
            | Self::ReviewFailed { improvement, .. }
            | Self::MergeFailed { improvement, .. }
            | Self::Generic { improvement, .. } => *improvement,
        }
    }

    /// True for every non-`Shipped` variant (spec §4.7.5 "on worker
    /// failure" / consecutive-failure accounting).
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Shipped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSource;

    fn ctx() -> FailureContext {
        FailureContext {
            task: Task::new("do thing", TaskSource::Backlog),
            branch: "harness-improvement-001".into(),
            worktree_path: "/wt/1".into(),
            pr_number: Some(7),
        }
    }

    #[test]
    fn shipped_is_not_a_failure() {
        let o = WorkerOutcome::Shipped {
            improvement: Improvement::new(1),
            task: Task::new("x", TaskSource::Backlog),
            steps: vec![],
        };
        assert!(!o.is_failure());
    }

    #[test]
    fn every_other_variant_is_a_failure() {
        let o = WorkerOutcome::ReviewFailed { improvement: Improvement::new(1), ctx: ctx() };
        assert!(o.is_failure());
    }
}
