//! `SchedulerState` — the orchestrator's mutable bookkeeping packaged into
//! one value (spec §9 "Global mutable state: model the scheduler's mutable
//! fields as a single state struct threaded explicitly through the loop
//! body, rather than module-level mutable statics").
//!
//! Kept deliberately free of I/O: the orchestrator owns one of these and
//! mutates it between iterations, but every transition here is a plain
//! method so the bookkeeping itself is unit-testable without threads.

use std::collections::{HashMap, HashSet};

use crate::task::{Improvement, Task};

/// Per-worker bookkeeping the orchestrator needs to route a finished run
/// back to its task and worktree (spec §4.7.2, §4.7.5).
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveWorker {
    pub improvement: Improvement,
    pub task: Task,
    pub worktree_path: String,
}

/// The orchestrator's full mutable state between loop iterations (spec §3
/// "Scheduler state", §4.7).
#[derive(Clone, Debug, Default)]
pub struct SchedulerState {
    next_improvement: u64,
    completed: u64,
    consecutive_failures: u32,
    main_not_green_retry_after: i64,
    in_flight_keys: HashSet<String>,
    active_workers: HashMap<u32, ActiveWorker>,
}

impl SchedulerState {
    #[must_use]
    pub fn new(starting_improvement: u64) -> Self {
        Self {
            next_improvement: starting_improvement,
            ..Default::default()
        }
    }

    /// Allocate and return the next improvement number.
    pub fn take_next_improvement(&mut self) -> Improvement {
        let n = Improvement::new(self.next_improvement);
        self.next_improvement += 1;
        n
    }

    #[must_use]
    pub const fn completed(&self) -> u64 {
        self.completed
    }

    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub const fn main_not_green_retry_after(&self) -> i64 {
        self.main_not_green_retry_after
    }

    pub fn set_main_not_green_retry_after(&mut self, epoch_secs: i64) {
        self.main_not_green_retry_after = epoch_secs;
    }

    #[must_use]
    pub const fn in_flight_keys(&self) -> &HashSet<String> {
        &self.in_flight_keys
    }

    #[must_use]
    pub fn active_worker_count(&self) -> usize {
        self.active_workers.len()
    }

    #[must_use]
    pub fn worktree_paths(&self) -> Vec<&str> {
        self.active_workers.values().map(|w| w.worktree_path.as_str()).collect()
    }

    /// Claim a worker slot for a freshly acquired task (spec §4.7.3).
    pub fn start_worker(&mut self, worker_id: u32, improvement: Improvement, task: Task, worktree_path: String) {
        self.in_flight_keys.insert(task.in_flight_key());
        self.active_workers.insert(
            worker_id,
            ActiveWorker { improvement, task, worktree_path },
        );
    }

    /// Release a worker slot on completion, returning the worker's record
    /// so the caller can route its outcome (spec §4.7.5).
    pub fn finish_worker(&mut self, worker_id: u32, success: bool) -> Option<ActiveWorker> {
        let worker = self.active_workers.remove(&worker_id)?;
        self.in_flight_keys.remove(&worker.task.in_flight_key());
        if success {
            self.completed += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        Some(worker)
    }

    /// Whether the consecutive-failure threshold has been reached (spec
    /// §4.7.5 "after N consecutive failures, stop acquiring new work").
    #[must_use]
    pub fn failure_threshold_reached(&self, max_consecutive_failures: u32) -> bool {
        self.consecutive_failures >= max_consecutive_failures
    }

    /// Available worker slots given a parallelism cap.
    #[must_use]
    pub fn available_slots(&self, parallelism: usize) -> usize {
        parallelism.saturating_sub(self.active_workers.len())
    }
}
