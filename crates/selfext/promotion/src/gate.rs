//! Promotion gate evaluation. Pure; no I/O.

use std::collections::{BTreeSet, HashMap};

use selfext_types::StatusContext;
use serde::{Deserialize, Serialize};

/// Contexts required when the caller supplies none.
pub const DEFAULT_REQUIRED_CONTEXTS: &[&str] = &["ci/build", "ci/test"];

const SUCCESS_STATES: &[&str] = &["success", "succeeded", "passed", "pass"];

const PENDING_STATES: &[&str] = &[
    "pending",
    "queued",
    "in_progress",
    "waiting",
    "requested",
    "expected",
];

const FAILING_STATES: &[&str] = &[
    "failure",
    "failed",
    "error",
    "errored",
    "cancelled",
    "canceled",
    "timed_out",
    "action_required",
    "startup_failure",
    "stale",
];

/// Classification of one reported state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextVerdict {
    Success,
    Pending,
    Failing,
    /// Outside every vocabulary; blocks like `Pending`.
    Unrecognized,
}

/// Gate outcome for one status snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionGateResult {
    pub ready: bool,
    pub blocked: bool,
    pub required_contexts: Vec<String>,
    pub missing_contexts: Vec<String>,
    pub pending_contexts: Vec<String>,
    pub failing_contexts: Vec<String>,
    pub block_reasons: Vec<String>,
}

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_context(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Classify a reported state string.
pub fn classify(state: &str) -> ContextVerdict {
    let state = normalize_context(state);
    if SUCCESS_STATES.contains(&state.as_str()) {
        ContextVerdict::Success
    } else if PENDING_STATES.contains(&state.as_str()) {
        ContextVerdict::Pending
    } else if FAILING_STATES.contains(&state.as_str()) {
        ContextVerdict::Failing
    } else {
        ContextVerdict::Unrecognized
    }
}

/// Evaluate `statuses` against the required contexts.
///
/// `None` uses [`DEFAULT_REQUIRED_CONTEXTS`]. When a context is reported more
/// than once the last report wins.
pub fn evaluate(statuses: &[StatusContext], required: Option<&[String]>) -> PromotionGateResult {
    let required: Vec<String> = match required {
        Some(list) => dedup(list.iter().map(|c| normalize_context(c))),
        None => dedup(DEFAULT_REQUIRED_CONTEXTS.iter().map(|c| normalize_context(c))),
    };

    let mut reported: HashMap<String, &str> = HashMap::new();
    for status in statuses {
        reported.insert(normalize_context(&status.context), status.state.as_str());
    }

    let mut result = PromotionGateResult {
        ready: false,
        blocked: false,
        required_contexts: required.clone(),
        missing_contexts: vec![],
        pending_contexts: vec![],
        failing_contexts: vec![],
        block_reasons: vec![],
    };

    for context in required {
        let Some(raw) = reported.get(&context) else {
            result
                .block_reasons
                .push(format!("required status context {context} is missing"));
            result.missing_contexts.push(context);
            continue;
        };
        match classify(raw) {
            ContextVerdict::Success => {}
            ContextVerdict::Pending => {
                result
                    .block_reasons
                    .push(format!("required status context {context} is pending"));
                result.pending_contexts.push(context);
            }
            ContextVerdict::Failing => {
                result.block_reasons.push(format!(
                    "required status context {context} is failing ({})",
                    normalize_context(raw)
                ));
                result.failing_contexts.push(context);
            }
            ContextVerdict::Unrecognized => {
                result.block_reasons.push(format!(
                    "required status context {context} has unrecognized state {raw:?}; treated as pending"
                ));
                result.pending_contexts.push(context);
            }
        }
    }

    result.ready = result.missing_contexts.is_empty()
        && result.pending_contexts.is_empty()
        && result.failing_contexts.is_empty();
    result.blocked = !result.ready;
    result
}

fn dedup(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_statuses_are_missing() {
        let r = evaluate(&[], Some(&required(&["ci/build"])));
        assert!(!r.ready);
        assert!(r.blocked);
        assert_eq!(r.missing_contexts, vec!["ci/build"]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let r = evaluate(
            &[StatusContext::new("CI/Build", "SUCCESS")],
            Some(&required(&["ci/build"])),
        );
        assert!(r.ready);
        assert!(r.block_reasons.is_empty());
    }

    #[test]
    fn pending_blocks() {
        let r = evaluate(
            &[StatusContext::new("ci/build", "pending")],
            Some(&required(&["ci/build"])),
        );
        assert!(!r.ready);
        assert_eq!(r.pending_contexts, vec!["ci/build"]);
    }

    #[test]
    fn failing_blocks() {
        let r = evaluate(
            &[StatusContext::new("ci/build", "Timed_Out")],
            Some(&required(&["ci/build"])),
        );
        assert_eq!(r.failing_contexts, vec!["ci/build"]);
        assert!(r.block_reasons[0].contains("timed_out"));
    }

    #[test]
    fn unknown_state_is_pending_not_success() {
        let r = evaluate(
            &[StatusContext::new("ci/build", "neutral")],
            Some(&required(&["ci/build"])),
        );
        assert!(!r.ready);
        assert_eq!(r.pending_contexts, vec!["ci/build"]);
        assert!(r.block_reasons[0].contains("\"neutral\""));
    }

    #[test]
    fn whitespace_is_collapsed() {
        let r = evaluate(
            &[StatusContext::new("  Security   Scan ", " passed ")],
            Some(&required(&["security scan"])),
        );
        assert!(r.ready);
    }

    #[test]
    fn last_report_wins() {
        let r = evaluate(
            &[
                StatusContext::new("ci/build", "failure"),
                StatusContext::new("ci/build", "success"),
            ],
            Some(&required(&["ci/build"])),
        );
        assert!(r.ready);
    }

    #[test]
    fn defaults_apply_when_unspecified() {
        let r = evaluate(&[StatusContext::new("ci/build", "success")], None);
        assert_eq!(r.required_contexts, vec!["ci/build", "ci/test"]);
        assert_eq!(r.missing_contexts, vec!["ci/test"]);
    }

    #[test]
    fn duplicate_required_contexts_collapse() {
        let r = evaluate(&[], Some(&required(&["ci/build", " CI/BUILD ", ""])));
        assert_eq!(r.required_contexts, vec!["ci/build"]);
        assert_eq!(r.missing_contexts.len(), 1);
    }

    #[test]
    fn mixed_outcomes_are_all_reported() {
        let r = evaluate(
            &[
                StatusContext::new("a", "success"),
                StatusContext::new("b", "queued"),
                StatusContext::new("c", "error"),
            ],
            Some(&required(&["a", "b", "c", "d"])),
        );
        assert_eq!(r.pending_contexts, vec!["b"]);
        assert_eq!(r.failing_contexts, vec!["c"]);
        assert_eq!(r.missing_contexts, vec!["d"]);
        assert_eq!(r.block_reasons.len(), 3);
    }

    #[test]
    fn classify_vocabularies() {
        assert_eq!(classify("Succeeded"), ContextVerdict::Success);
        assert_eq!(classify("in_progress"), ContextVerdict::Pending);
        assert_eq!(classify("CANCELLED"), ContextVerdict::Failing);
        assert_eq!(classify("skipped"), ContextVerdict::Unrecognized);
    }
}
