use selfext_rollback::KnownGoodBaseline;
use selfext_types::{LifecycleEvent, LifecycleEventType, PromotionControlState};
use serde::{Deserialize, Serialize};

/// Operator-facing snapshot: is the agent changing itself, and is that safe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    pub control: PromotionControlState,
    /// Latest event of each run, newest run first.
    pub runs: Vec<LifecycleEvent>,
    pub rollback_in_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<KnownGoodBaseline>,
}

impl OperatorStatus {
    /// Runs whose latest event is not terminal.
    pub fn active_runs(&self) -> impl Iterator<Item = &LifecycleEvent> {
        self.runs.iter().filter(|e| !e.event_type.is_terminal())
    }
}

/// A rollback is in progress when some run's latest event is `rollback_started`.
pub(crate) fn rollback_pending(runs: &[LifecycleEvent]) -> bool {
    runs.iter()
        .any(|e| e.event_type == LifecycleEventType::RollbackStarted)
}
