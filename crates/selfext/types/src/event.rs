//! Lifecycle events: the append-only audit vocabulary.
//!
//! A self-extension attempt is a *run*. Each stage transition inside a run is
//! a new [`LifecycleEvent`] row sharing the same `run_id`; rows are never
//! updated or deleted. `correlation_id` links related runs, e.g. a rollback
//! run back to the run it reverts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ContextId, ExecutionContext};
use crate::error::TypesError;

// ── Event Type ─────────────────────────────────────────────────────────

/// Closed set of lifecycle transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    /// A change was proposed and a staging attempt started.
    Proposed,
    /// The change compiled and passed its sandbox test.
    Tested,
    /// Promotion was refused by the gate or the pause switch.
    PromotionBlocked,
    /// The change was cleared for promotion.
    Promoted,
    /// The attempt failed (precondition, compile, sandbox, merge, git).
    Failed,
    /// An operator paused or resumed promotions.
    PromotionPauseChanged,
    /// A rollback to the known-good baseline began.
    RollbackStarted,
    /// The rollback restored the baseline.
    RolledBack,
    /// The rollback could not restore the baseline.
    RollbackFailed,
    /// A promoted change failed its post-promotion observation window.
    HealthWindowFailed,
    /// A promoted change survived its observation window.
    HealthWindowPassed,
}

impl LifecycleEventType {
    /// Every member of the vocabulary, in lifecycle order.
    pub const ALL: [LifecycleEventType; 11] = [
        LifecycleEventType::Proposed,
        LifecycleEventType::Tested,
        LifecycleEventType::PromotionBlocked,
        LifecycleEventType::Promoted,
        LifecycleEventType::Failed,
        LifecycleEventType::PromotionPauseChanged,
        LifecycleEventType::RollbackStarted,
        LifecycleEventType::RolledBack,
        LifecycleEventType::RollbackFailed,
        LifecycleEventType::HealthWindowFailed,
        LifecycleEventType::HealthWindowPassed,
    ];

    /// Wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventType::Proposed => "proposed",
            LifecycleEventType::Tested => "tested",
            LifecycleEventType::PromotionBlocked => "promotion_blocked",
            LifecycleEventType::Promoted => "promoted",
            LifecycleEventType::Failed => "failed",
            LifecycleEventType::PromotionPauseChanged => "promotion_pause_changed",
            LifecycleEventType::RollbackStarted => "rollback_started",
            LifecycleEventType::RolledBack => "rolled_back",
            LifecycleEventType::RollbackFailed => "rollback_failed",
            LifecycleEventType::HealthWindowFailed => "health_window_failed",
            LifecycleEventType::HealthWindowPassed => "health_window_passed",
        }
    }

    /// Whether this event ends a run (no further transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEventType::Failed
                | LifecycleEventType::PromotionBlocked
                | LifecycleEventType::RolledBack
                | LifecycleEventType::RollbackFailed
                | LifecycleEventType::HealthWindowPassed
        )
    }

    /// Whether this event belongs to a rollback run.
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            LifecycleEventType::RollbackStarted
                | LifecycleEventType::RolledBack
                | LifecycleEventType::RollbackFailed
        )
    }
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleEventType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        LifecycleEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| TypesError::UnknownEventType(s.to_string()))
    }
}

// ── Append Request ─────────────────────────────────────────────────────

/// An event as handed to the ledger, before normalization.
///
/// Fields are deliberately loose: the ledger normalizes rather than rejects
/// (blank run → placeholder, blank stage → event type, blank ids → null).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleAppend {
    pub run_id: Option<String>,
    pub correlation_id: Option<String>,
    pub stage: Option<String>,
    pub event_type: LifecycleEventType,
    pub actor_source: Option<String>,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub goal_id: Option<ContextId>,
    pub cycle_id: Option<ContextId>,
    pub sub_goal_id: Option<ContextId>,
    #[serde(default)]
    pub payload: Value,
}

impl LifecycleAppend {
    pub fn new(event_type: LifecycleEventType) -> Self {
        Self {
            run_id: None,
            correlation_id: None,
            stage: None,
            event_type,
            actor_source: None,
            tool_name: None,
            tool_call_id: None,
            goal_id: None,
            cycle_id: None,
            sub_goal_id: None,
            payload: Value::Null,
        }
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn actor(mut self, actor_source: impl Into<String>) -> Self {
        self.actor_source = Some(actor_source.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Copy every provenance identifier from an execution context.
    pub fn context(mut self, ctx: &ExecutionContext) -> Self {
        self.tool_name = Some(ctx.tool_name.clone());
        self.tool_call_id = ctx.tool_call_id.clone();
        self.goal_id = ctx.goal_id.clone();
        self.cycle_id = ctx.cycle_id.clone();
        self.sub_goal_id = ctx.sub_goal_id.clone();
        if self.actor_source.is_none() {
            self.actor_source = ctx.actor_source.clone();
        }
        self
    }
}

// ── Stored Event ───────────────────────────────────────────────────────

/// A persisted, immutable ledger row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Surrogate key, monotonically increasing per ledger.
    pub id: i64,
    pub run_id: String,
    pub correlation_id: Option<String>,
    pub stage: String,
    pub event_type: LifecycleEventType,
    pub actor_source: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub goal_id: Option<String>,
    pub cycle_id: Option<String>,
    pub sub_goal_id: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    /// Hash of the preceding row, `None` for the first row.
    pub previous_hash: Option<String>,
    /// Hash over this row's content and `previous_hash`.
    pub hash: String,
}

impl LifecycleEvent {
    pub fn receipt(&self) -> LifecycleReceipt {
        LifecycleReceipt {
            id: self.id,
            run_id: self.run_id.clone(),
            stage: self.stage.clone(),
            event_type: self.event_type,
            created_at: self.created_at,
        }
    }
}

/// What `append` hands back to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReceipt {
    pub id: i64,
    pub run_id: String,
    pub stage: String,
    pub event_type: LifecycleEventType,
    pub created_at: DateTime<Utc>,
}
