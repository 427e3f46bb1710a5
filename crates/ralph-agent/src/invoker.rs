//! `runStep` (spec §4.5, C5) — the one operation this crate exposes.

use std::path::Path;
use std::time::Instant;

use ralph_core::clock::now_rfc3339;
use ralph_core::eventlog::{Event, EventLog};
use ralph_proc::CancellationToken;

use crate::message::parse_line;
use crate::reducer::{StepReducer, StepResult};

/// Everything one `runStep` call needs (spec §4.5 `runStep({prompt,
/// stepName, improvement, cwd, model, backend, cancellation})`).
pub struct StepParams<'a> {
    pub prompt: &'a str,
    pub step: &'a str,
    pub backend: &'a str,
    pub improvement: u64,
    pub cwd: &'a Path,
    /// The backend's argv, e.g. `["claude", "--max-turns", "100"]`; the
    /// prompt is always delivered over stdin, never appended here (spec
    /// §4.1 "feed the prompt via stdin to avoid argv length limits").
    pub argv: &'a [&'a str],
    pub cancel: &'a CancellationToken,
}

/// Run one pipeline step against an agent backend and aggregate its
/// streamed events into a [`StepResult`], logging `step_start`/`step_end`
/// around it (spec §4.5, §6).
pub fn run_step(params: &StepParams<'_>, log: &EventLog) -> Result<StepResult, ralph_core::CoreError> {
    log.append(&Event::StepStart {
        improvement: params.improvement,
        step: params.step.to_owned(),
        backend: params.backend.to_owned(),
        ts: now_rfc3339(),
    })?;

    let started = Instant::now();
    let mut reducer = StepReducer::new();
    let subprocess_result = ralph_proc::run_streaming(params.argv, params.cwd, Some(params.prompt), params.cancel, |line| {
        if let Some(msg) = parse_line(line) {
            if let Some(preview) = reducer.apply(&msg) {
                tracing::debug!(improvement = params.improvement, step = params.step, "{preview}");
            }
        }
    });
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut result = reducer.finish();
    if subprocess_result.is_err() {
        result.success = false;
    }

    log.append(&Event::StepEnd {
        step: params.step.to_owned(),
        backend: params.backend.to_owned(),
        turns: result.turns,
        cost_usd: result.cost_usd,
        input_tokens: result.input_tokens,
        output_tokens: result.output_tokens,
        duration_ms,
        ts: now_rfc3339(),
    })?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn successful_step_logs_start_and_end() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        let argv = [
            "sh",
            "-c",
            r#"printf '{"type":"result","success":true,"text":"DONE: x","turns":1,"input_tokens":1,"output_tokens":1,"cost_usd":0.0}\n'"#,
        ];
        let params = StepParams {
            prompt: "do the thing",
            step: "implement",
            backend: "test-backend",
            improvement: 1,
            cwd: dir.path(),
            argv: &argv,
            cancel: &CancellationToken::new(),
        };
        let result = run_step(&params, &log).unwrap();
        assert!(result.success);
        assert_eq!(result.output_text, "DONE: x");

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::StepStart { .. }));
        assert!(matches!(events[1], Event::StepEnd { .. }));
    }

    #[test]
    fn step_with_no_terminal_result_fails() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        let argv = ["sh", "-c", r#"printf '{"type":"assistant","text":"thinking"}\n'"#];
        let params = StepParams {
            prompt: "x",
            step: "plan",
            backend: "test-backend",
            improvement: 2,
            cwd: dir.path(),
            argv: &argv,
            cancel: &CancellationToken::new(),
        };
        let result = run_step(&params, &log).unwrap();
        assert!(!result.success);
    }
}
