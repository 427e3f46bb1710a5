//! `StepMessage` — the tagged shape of one line an agent backend emits on
//! stdout (spec §9 "Dynamic event streams from agents": model the per-step
//! event stream as tagged variants... drive aggregation through an
//! explicit reducer, not ad-hoc property probing").
//!
//! Backends are free to emit any JSON shape on a line; anything that
//! doesn't match one of these variants, or isn't JSON at all, is simply
//! not a `StepMessage` (spec §4.1, §9 "tolerate non-JSON lines silently").

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepMessage {
    Assistant { text: String },
    Tool { name: String, summary: String },
    Compaction { pre_tokens: u64 },
    Result {
        success: bool,
        text: String,
        turns: u32,
        #[serde(default)]
        input_tokens: u64,
        #[serde(default)]
        output_tokens: u64,
        #[serde(default)]
        cost_usd: f64,
    },
    TurnCompleted { turns: u32, tokens: u64 },
    Error { msg: String },
}

/// Parse one stdout line into a `StepMessage`, returning `None` for
/// anything that isn't valid JSON or doesn't match a known shape.
#[must_use]
pub fn parse_line(line: &str) -> Option<StepMessage> {
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_line_is_none() {
        assert_eq!(parse_line("not json at all"), None);
    }

    #[test]
    fn parses_result_message() {
        let line = r#"{"type":"result","success":true,"text":"DONE: did the thing","turns":3,"input_tokens":100,"output_tokens":50,"cost_usd":0.02}"#;
        let msg = parse_line(line).unwrap();
        assert!(matches!(msg, StepMessage::Result { success: true, turns: 3, .. }));
    }

    #[test]
    fn parses_tool_message() {
        let line = r#"{"type":"tool","name":"edit_file","summary":"src/lib.rs"}"#;
        assert!(matches!(parse_line(line), Some(StepMessage::Tool { .. })));
    }

    #[test]
    fn unknown_type_tag_is_none() {
        let line = r#"{"type":"something_new","foo":"bar"}"#;
        assert_eq!(parse_line(line), None);
    }
}
