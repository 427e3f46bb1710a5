//! Task-text normalization and equivalence (spec §4.4).
//!
//! Used only by reconciliation (`syncFromLog`) to decide whether a merged
//! task and a backlog/triage line refer to the same improvement. Never
//! alters stored text — normalization is purely a matching-time view.

use std::collections::HashSet;

/// Lowercase, strip markdown noise, collapse punctuation to spaces, and
/// collapse whitespace. Spec §4.4 steps 1–4.
#[must_use]
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| !matches!(c, '`' | '*' | '_'))
        .collect();
    let punctuation_free: String = stripped
        .chars()
        .map(|c| if matches!(c, '.' | ',' | ':' | ';' | '(' | ')') { ' ' } else { c })
        .collect();
    punctuation_free.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tokens of length >= 4 from the normalized form, as a set (spec §4.4,
/// §8 boundary: tokens of length < 4 are ignored).
fn tokens(text: &str) -> HashSet<String> {
    normalize(text)
        .split_whitespace()
        .filter(|t| t.len() >= 4)
        .map(ToOwned::to_owned)
        .collect()
}

/// Is candidate `c` equivalent to merged task `m`? Spec §4.4: exact match
/// after normalization, or token overlap with intersection >= 6 AND
/// intersection >= 60% of the smaller token set, with both sets non-empty.
#[must_use]
pub fn equivalent(m: &str, c: &str) -> bool {
    if normalize(m) == normalize(c) {
        return true;
    }
    let tm = tokens(m);
    let tc = tokens(c);
    if tm.is_empty() || tc.is_empty() {
        return false;
    }
    let overlap = tm.intersection(&tc).count();
    if overlap < 6 {
        return false;
    }
    let smaller = tm.len().min(tc.len());
    // ratio >= 0.6 without floating point: overlap * 10 >= smaller * 6
    overlap * 10 >= smaller * 6
}
