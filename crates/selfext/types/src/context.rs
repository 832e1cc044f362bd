//! Execution context: the provenance of a self-extension attempt.
//!
//! Identifiers originate in the planner and may be numeric or textual. The
//! context is threaded through branch naming, commit metadata, and every
//! ledger row so that each change can be traced back to the goal, cycle, and
//! sub-goal that produced it.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Context Identifier ─────────────────────────────────────────────────

/// A planner identifier, either numeric or textual.
///
/// Serialized untagged so that `42` and `"42"` round-trip as they arrived.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextId {
    /// Numeric identifier (database surrogate keys).
    Number(i64),
    /// Free-form identifier.
    Text(String),
}

impl ContextId {
    /// Trimmed string form, `None` when the identifier is blank.
    pub fn normalized(&self) -> Option<String> {
        let s = self.to_string();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// JSON form used inside the commit metadata envelope.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ContextId::Number(n) => serde_json::Value::from(*n),
            ContextId::Text(s) => serde_json::Value::from(s.clone()),
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextId::Number(n) => write!(f, "{}", n),
            ContextId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ContextId {
    fn from(value: i64) -> Self {
        ContextId::Number(value)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        ContextId::Text(value.to_string())
    }
}

impl From<String> for ContextId {
    fn from(value: String) -> Self {
        ContextId::Text(value)
    }
}

// ── Execution Context ──────────────────────────────────────────────────

/// Identifiers of the planning activity that originated a change.
///
/// Built once and then only read; downstream components borrow it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Goal that triggered the self-extension.
    pub goal_id: Option<ContextId>,
    /// Planner cycle within the goal.
    pub cycle_id: Option<ContextId>,
    /// Sub-goal within the cycle.
    pub sub_goal_id: Option<ContextId>,
    /// Name of the tool being created or modified.
    pub tool_name: String,
    /// Tool call that requested the change, if any.
    pub tool_call_id: Option<String>,
    /// Who initiated the change (agent, operator, scheduler).
    pub actor_source: Option<String>,
}

impl ExecutionContext {
    /// Context for a tool with no planner identifiers.
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            goal_id: None,
            cycle_id: None,
            sub_goal_id: None,
            tool_name: tool_name.into(),
            tool_call_id: None,
            actor_source: None,
        }
    }

    pub fn with_goal(mut self, goal_id: impl Into<ContextId>) -> Self {
        self.goal_id = Some(goal_id.into());
        self
    }

    pub fn with_cycle(mut self, cycle_id: impl Into<ContextId>) -> Self {
        self.cycle_id = Some(cycle_id.into());
        self
    }

    pub fn with_sub_goal(mut self, sub_goal_id: impl Into<ContextId>) -> Self {
        self.sub_goal_id = Some(sub_goal_id.into());
        self
    }

    pub fn with_tool_call(mut self, tool_call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    pub fn with_actor(mut self, actor_source: impl Into<String>) -> Self {
        self.actor_source = Some(actor_source.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_id_untagged_serde() {
        let n: ContextId = serde_json::from_str("42").unwrap();
        assert_eq!(n, ContextId::Number(42));
        let s: ContextId = serde_json::from_str("\"g-7\"").unwrap();
        assert_eq!(s, ContextId::Text("g-7".into()));
        assert_eq!(serde_json::to_string(&n).unwrap(), "42");
    }

    #[test]
    fn blank_identifier_normalizes_to_none() {
        assert_eq!(ContextId::from("   ").normalized(), None);
        assert_eq!(ContextId::from(" abc ").normalized(), Some("abc".into()));
        assert_eq!(ContextId::from(7).normalized(), Some("7".into()));
    }

    #[test]
    fn builder_sets_fields() {
        let ctx = ExecutionContext::new("weather")
            .with_goal(1)
            .with_cycle("c2")
            .with_sub_goal(3)
            .with_tool_call("call-9")
            .with_actor("planner");
        assert_eq!(ctx.tool_name, "weather");
        assert_eq!(ctx.goal_id, Some(ContextId::Number(1)));
        assert_eq!(ctx.cycle_id, Some(ContextId::Text("c2".into())));
        assert_eq!(ctx.tool_call_id.as_deref(), Some("call-9"));
        assert_eq!(ctx.actor_source.as_deref(), Some("planner"));
    }

    #[test]
    fn context_serializes_camel_case() {
        let ctx = ExecutionContext::new("t").with_sub_goal(5);
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["subGoalId"], 5);
        assert_eq!(json["toolName"], "t");
    }
}
