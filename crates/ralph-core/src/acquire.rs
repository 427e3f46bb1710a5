//! Task acquisition (spec §4.7.3, §9 "Model the acquire operation as a pure
//! function").
//!
//! Modeled exactly as the design note suggests: a pure function over
//! `(triage, backlog, in_flight_keys, now, main_not_green_retry_after)`
//! returning the next task to run, so deferral logic is unit-testable
//! without subprocesses.

use std::collections::HashSet;

use crate::task::{Task, TaskSource};

/// The canonical text of the main-not-green sentinel task (spec glossary).
/// Matched by exact normalized form so operators can phrase it however they
/// like in the triage file as long as it round-trips through `add_if_absent`
/// with this exact text.
pub const MAIN_NOT_GREEN_SENTINEL: &str =
    "Restore main to green: fix whatever is failing `validate` on the main branch.";

/// Acquire the next eligible task, honoring the main-not-green cooldown
/// (spec §4.7.3). Order: triage first, then backlog; a task is eligible iff
/// `source:text` is not already in flight. If the only acquirable triage
/// task is the main-not-green sentinel and `now < retry_after`, it is
/// deferred — remembered as a fallback and only returned if nothing else
/// is acquirable.
#[must_use]
pub fn acquire(
    triage: &[String],
    backlog: &[String],
    in_flight: &HashSet<String>,
    now_epoch_secs: i64,
    main_not_green_retry_after: i64,
) -> Option<Task> {
    let mut deferred_sentinel: Option<Task> = None;

    for text in triage {
        let task = Task::new(text.clone(), TaskSource::Triage);
        if in_flight.contains(&task.in_flight_key()) {
            continue;
        }
        if text.trim() == MAIN_NOT_GREEN_SENTINEL && now_epoch_secs < main_not_green_retry_after {
            deferred_sentinel.get_or_insert(task);
            continue;
        }
        return Some(task);
    }

    for text in backlog {
        let task = Task::new(text.clone(), TaskSource::Backlog);
        if in_flight.contains(&task.in_flight_key()) {
            continue;
        }
        return Some(task);
    }

    deferred_sentinel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triage_before_backlog() {
        let triage = vec!["Triage task".to_owned()];
        let backlog = vec!["Backlog task".to_owned()];
        let t = acquire(&triage, &backlog, &HashSet::new(), 0, 0).unwrap();
        assert_eq!(t.text, "Triage task");
        assert_eq!(t.source, TaskSource::Triage);
    }

    #[test]
    fn in_flight_tasks_are_skipped() {
        let triage = vec!["Triage task".to_owned()];
        let backlog = vec!["Backlog task".to_owned()];
        let mut in_flight = HashSet::new();
        in_flight.insert(Task::new("Triage task", TaskSource::Triage).in_flight_key());
        let t = acquire(&triage, &backlog, &in_flight, 0, 0).unwrap();
        assert_eq!(t.text, "Backlog task");
    }

    #[test]
    fn sentinel_deferred_during_cooldown_if_other_work_exists() {
        let triage = vec![MAIN_NOT_GREEN_SENTINEL.to_owned()];
        let backlog = vec!["Other task".to_owned()];
        let t = acquire(&triage, &backlog, &HashSet::new(), 100, 200).unwrap();
        assert_eq!(t.text, "Other task");
    }

    #[test]
    fn sentinel_returned_as_fallback_when_nothing_else_available() {
        let triage = vec![MAIN_NOT_GREEN_SENTINEL.to_owned()];
        let t = acquire(&triage, &[], &HashSet::new(), 100, 200).unwrap();
        assert_eq!(t.text, MAIN_NOT_GREEN_SENTINEL);
    }

    #[test]
    fn sentinel_acquired_normally_once_cooldown_elapses() {
        let triage = vec![MAIN_NOT_GREEN_SENTINEL.to_owned()];
        let t = acquire(&triage, &[], &HashSet::new(), 300, 200).unwrap();
        assert_eq!(t.text, MAIN_NOT_GREEN_SENTINEL);
    }

    #[test]
    fn nothing_acquirable_returns_none() {
        assert!(acquire(&[], &[], &HashSet::new(), 0, 0).is_none());
    }
}
