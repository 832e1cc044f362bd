use chrono::{DateTime, Utc};
use selfext_types::LifecycleEvent;
use serde::{Deserialize, Serialize};

/// Last version confirmed healthy after a promotion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownGoodBaseline {
    pub commit: String,
    pub branch: String,
    pub run_id: String,
    pub confirmed_at: DateTime<Utc>,
}

impl KnownGoodBaseline {
    /// Rebuild from a `health_window_passed` ledger row.
    pub fn from_event(event: &LifecycleEvent) -> Option<Self> {
        let commit = event.payload.get("commit")?.as_str()?.trim();
        let branch = event.payload.get("branch")?.as_str()?.trim();
        if commit.is_empty() || branch.is_empty() {
            return None;
        }
        Some(Self {
            commit: commit.to_string(),
            branch: branch.to_string(),
            run_id: event.run_id.clone(),
            confirmed_at: event.created_at,
        })
    }
}

/// Result of observing a promoted change for one health window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthVerdict {
    /// Run that promoted the observed change.
    pub run_id: String,
    pub commit: String,
    pub branch: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthVerdict {
    pub fn passed(
        run_id: impl Into<String>,
        commit: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            commit: commit.into(),
            branch: branch.into(),
            passed: true,
            detail: None,
        }
    }

    pub fn failed(
        run_id: impl Into<String>,
        commit: impl Into<String>,
        branch: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            commit: commit.into(),
            branch: branch.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfext_types::LifecycleEventType;
    use serde_json::json;

    fn event(payload: serde_json::Value) -> LifecycleEvent {
        LifecycleEvent {
            id: 3,
            run_id: "run-9".into(),
            correlation_id: None,
            stage: "health".into(),
            event_type: LifecycleEventType::HealthWindowPassed,
            actor_source: "monitor".into(),
            tool_name: None,
            tool_call_id: None,
            goal_id: None,
            cycle_id: None,
            sub_goal_id: None,
            payload,
            created_at: Utc::now(),
            previous_hash: None,
            hash: "h".into(),
        }
    }

    #[test]
    fn baseline_from_event() {
        let b = KnownGoodBaseline::from_event(&event(json!({"commit": "abc", "branch": "main"})))
            .unwrap();
        assert_eq!(b.commit, "abc");
        assert_eq!(b.run_id, "run-9");
    }

    #[test]
    fn event_without_commit_is_ignored() {
        assert!(KnownGoodBaseline::from_event(&event(json!({"branch": "main"}))).is_none());
        assert!(KnownGoodBaseline::from_event(&event(json!({"commit": " ", "branch": "main"})))
            .is_none());
    }
}
