//! Commit metadata envelope.
//!
//! The envelope is embedded as a trailer in every staging commit:
//!
//! ```text
//! self-extension: update tool weather
//!
//! Self-Extension-Metadata: {"actorSource":null,"cycleId":2,...}
//! ```

use selfext_types::{ContextId, ExecutionContext};
use serde_json::{Map, Value};

use crate::canonical::canonical_json;
use crate::error::{ProvenanceError, ProvenanceResult};

/// Version of the envelope layout.
pub const SCHEMA_VERSION: u64 = 1;

/// Trailer key carrying the serialized envelope.
pub const METADATA_TRAILER: &str = "Self-Extension-Metadata";

/// Canonical commit metadata: the structured payload and its byte-stable form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitMetadata {
    pub payload: Value,
    pub serialized: String,
}

/// Build the envelope for an execution context.
pub fn build_commit_metadata(ctx: &ExecutionContext) -> CommitMetadata {
    let mut map = Map::new();
    map.insert("schemaVersion".into(), Value::from(SCHEMA_VERSION));
    map.insert("goalId".into(), id_value(ctx.goal_id.as_ref()));
    map.insert("cycleId".into(), id_value(ctx.cycle_id.as_ref()));
    map.insert("subGoalId".into(), id_value(ctx.sub_goal_id.as_ref()));
    map.insert("toolName".into(), text_value(Some(&ctx.tool_name)));
    map.insert("toolCallId".into(), text_value(ctx.tool_call_id.as_ref()));
    map.insert("actorSource".into(), text_value(ctx.actor_source.as_ref()));

    let payload = Value::Object(map);
    let serialized = canonical_json(&payload);
    CommitMetadata {
        payload,
        serialized,
    }
}

/// Staging commit message identifying the tool and carrying the envelope.
pub fn commit_message(ctx: &ExecutionContext, metadata: &CommitMetadata) -> String {
    format!(
        "self-extension: update tool {}\n\n{}: {}\n",
        ctx.tool_name.trim(),
        METADATA_TRAILER,
        metadata.serialized
    )
}

/// Recover the envelope from a commit message, rejecting non-canonical text.
pub fn parse_commit_metadata(message: &str) -> ProvenanceResult<CommitMetadata> {
    let prefix = format!("{METADATA_TRAILER}:");
    let raw = message
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .ok_or(ProvenanceError::MissingTrailer)?;

    let payload: Value =
        serde_json::from_str(raw).map_err(|e| ProvenanceError::Malformed(e.to_string()))?;
    let serialized = canonical_json(&payload);
    if serialized != raw {
        return Err(ProvenanceError::NonCanonical);
    }

    Ok(CommitMetadata {
        payload,
        serialized,
    })
}

fn id_value(id: Option<&ContextId>) -> Value {
    match id {
        Some(ContextId::Number(n)) => Value::from(*n),
        Some(text @ ContextId::Text(_)) => text.normalized().map(Value::from).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

fn text_value(value: Option<&String>) -> Value {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(Value::from)
        .unwrap_or(Value::Null)
}
