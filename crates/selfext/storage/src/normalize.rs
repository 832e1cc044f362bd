//! Input normalization for ledger appends.

use chrono::{DateTime, SubsecRound, Utc};
use selfext_types::{ContextId, LifecycleAppend, LifecycleEvent, LifecycleEventType};
use serde_json::{Map, Value};

/// Run id recorded when the caller supplies none.
pub const UNKNOWN_RUN_ID: &str = "unknown-run";

/// Actor recorded when the caller supplies none.
pub const DEFAULT_ACTOR: &str = "agent";

/// A fully-normalized event awaiting an id and a place in the chain.
#[derive(Clone, Debug)]
pub(crate) struct PendingEvent {
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
}

impl PendingEvent {
    pub fn into_event(self, id: i64, previous_hash: Option<String>, hash: String) -> LifecycleEvent {
        LifecycleEvent {
            id,
            run_id: self.run_id,
            correlation_id: self.correlation_id,
            stage: self.stage,
            event_type: self.event_type,
            actor_source: self.actor_source,
            tool_name: self.tool_name,
            tool_call_id: self.tool_call_id,
            goal_id: self.goal_id,
            cycle_id: self.cycle_id,
            sub_goal_id: self.sub_goal_id,
            payload: self.payload,
            created_at: self.created_at,
            previous_hash,
            hash,
        }
    }
}

/// Apply the append rules. Never fails.
pub(crate) fn normalize(event: LifecycleAppend, now: DateTime<Utc>) -> PendingEvent {
    let event_type = event.event_type;
    PendingEvent {
        run_id: text(event.run_id).unwrap_or_else(|| UNKNOWN_RUN_ID.to_string()),
        correlation_id: text(event.correlation_id),
        stage: text(event.stage).unwrap_or_else(|| event_type.as_str().to_string()),
        event_type,
        actor_source: text(event.actor_source).unwrap_or_else(|| DEFAULT_ACTOR.to_string()),
        tool_name: text(event.tool_name),
        tool_call_id: text(event.tool_call_id),
        goal_id: id(event.goal_id),
        cycle_id: id(event.cycle_id),
        sub_goal_id: id(event.sub_goal_id),
        payload: match event.payload {
            Value::Object(map) => Value::Object(map),
            _ => Value::Object(Map::new()),
        },
        // Stored at microsecond precision so every backend round-trips the
        // exact value that was hashed.
        created_at: now.trunc_subsecs(6),
    }
}

fn text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn id(value: Option<ContextId>) -> Option<String> {
    value.and_then(|v| v.normalized())
}
