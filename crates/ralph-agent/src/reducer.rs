//! The explicit reducer that aggregates a [`StepMessage`](crate::message::StepMessage)
//! stream into a [`StepResult`] (spec §9).

use crate::message::StepMessage;

/// The terminal aggregation of one `runStep` call (spec §4.5 `StepResult`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepResult {
    pub success: bool,
    pub turns: u32,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub output_text: String,
    /// True once a `Result` message has been observed. If the subprocess
    /// exits without ever emitting one, the step is treated as failed
    /// (spec §4.5 "If the subprocess prints no terminal result event,
    /// treat the step as failed").
    pub saw_terminal_result: bool,
}

/// Accumulates `StepMessage`s into a [`StepResult`]. Pure aside from the
/// optional tool-call preview callback, so the folding logic is testable
/// without a subprocess.
#[derive(Default)]
pub struct StepReducer {
    result: StepResult,
}

impl StepReducer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one message. Returns a truncated tool-call preview for the
    /// caller to forward to the logger (spec §4.5 "forwards a truncated
    /// preview of tool invocations to the logger"), or `None` for
    /// messages that aren't tool calls.
    pub fn apply(&mut self, msg: &StepMessage) -> Option<String> {
        match msg {
            StepMessage::Assistant { .. } | StepMessage::Compaction { .. } | StepMessage::Error { .. } => None,
            StepMessage::Tool { name, summary } => {
                const PREVIEW_LEN: usize = 120;
                let preview: String = summary.chars().take(PREVIEW_LEN).collect();
                Some(format!("{name}: {preview}"))
            }
            StepMessage::TurnCompleted { turns, .. } => {
                self.result.turns = (*turns).max(self.result.turns);
                None
            }
            StepMessage::Result { success, text, turns, input_tokens, output_tokens, cost_usd } => {
                self.result.success = *success;
                self.result.output_text = text.clone();
                self.result.turns = (*turns).max(self.result.turns);
                self.result.input_tokens = *input_tokens;
                self.result.output_tokens = *output_tokens;
                self.result.cost_usd = *cost_usd;
                self.result.saw_terminal_result = true;
                None
            }
        }
    }

    /// Finish folding. If no terminal `Result` was ever observed, the step
    /// is forced to `success=false` regardless of what was accumulated.
    #[must_use]
    pub fn finish(mut self) -> StepResult {
        if !self.result.saw_terminal_result {
            self.result.success = false;
        }
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_max_turns_across_turn_completed_and_result() {
        let mut r = StepReducer::new();
        r.apply(&StepMessage::TurnCompleted { turns: 2, tokens: 10 });
        r.apply(&StepMessage::Result {
            success: true,
            text: "DONE: x".into(),
            turns: 5,
            input_tokens: 100,
            output_tokens: 20,
            cost_usd: 0.01,
        });
        let result = r.finish();
        assert_eq!(result.turns, 5);
        assert!(result.success);
    }

    #[test]
    fn missing_terminal_result_forces_failure() {
        let mut r = StepReducer::new();
        r.apply(&StepMessage::Assistant { text: "thinking...".into() });
        let result = r.finish();
        assert!(!result.success);
        assert!(!result.saw_terminal_result);
    }

    #[test]
    fn tool_call_produces_truncated_preview() {
        let mut r = StepReducer::new();
        let long_summary = "x".repeat(500);
        let preview = r.apply(&StepMessage::Tool { name: "edit_file".into(), summary: long_summary }).unwrap();
        assert!(preview.starts_with("edit_file: "));
        assert!(preview.len() < 500);
    }

    #[test]
    fn explicit_failure_result_is_not_overridden() {
        let mut r = StepReducer::new();
        r.apply(&StepMessage::Result {
            success: false,
            text: String::new(),
            turns: 1,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        });
        assert!(!r.finish().success);
    }
}
