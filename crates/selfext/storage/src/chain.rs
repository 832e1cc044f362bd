//! blake3 hash chain over ledger rows.

use chrono::{DateTime, SecondsFormat, Utc};
use selfext_provenance::canonical_json;
use selfext_types::LifecycleEvent;
use serde_json::json;

use crate::normalize::PendingEvent;
use crate::{StorageError, StorageResult};

/// Timestamp form used both for hashing and for text storage.
pub(crate) fn timestamp_text(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn compute_event_hash(
    id: i64,
    event: &PendingEvent,
    previous_hash: Option<&str>,
) -> String {
    let serializable = json!({
        "id": id,
        "previous_hash": previous_hash,
        "run_id": event.run_id,
        "correlation_id": event.correlation_id,
        "stage": event.stage,
        "event_type": event.event_type.as_str(),
        "actor_source": event.actor_source,
        "tool_name": event.tool_name,
        "tool_call_id": event.tool_call_id,
        "goal_id": event.goal_id,
        "cycle_id": event.cycle_id,
        "sub_goal_id": event.sub_goal_id,
        "payload": event.payload,
        "created_at": timestamp_text(&event.created_at),
    });
    blake3::hash(canonical_json(&serializable).as_bytes())
        .to_hex()
        .to_string()
}

fn rehash(event: &LifecycleEvent) -> String {
    let pending = PendingEvent {
        run_id: event.run_id.clone(),
        correlation_id: event.correlation_id.clone(),
        stage: event.stage.clone(),
        event_type: event.event_type,
        actor_source: event.actor_source.clone(),
        tool_name: event.tool_name.clone(),
        tool_call_id: event.tool_call_id.clone(),
        goal_id: event.goal_id.clone(),
        cycle_id: event.cycle_id.clone(),
        sub_goal_id: event.sub_goal_id.clone(),
        payload: event.payload.clone(),
        created_at: event.created_at,
    };
    compute_event_hash(event.id, &pending, event.previous_hash.as_deref())
}

/// Check stored hashes and links.
///
/// Every event's hash is recomputed. Links are checked between events whose
/// ids are adjacent, so both a full ledger listing and a single run's
/// (sparse) events can be verified. Order of `events` does not matter.
pub fn verify_chain(events: &[LifecycleEvent]) -> StorageResult<()> {
    let mut sorted: Vec<&LifecycleEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.id);

    for (i, event) in sorted.iter().enumerate() {
        if rehash(event) != event.hash {
            return Err(StorageError::ChainBroken(format!(
                "lifecycle event {} hash mismatch",
                event.id
            )));
        }
        if event.id == 1 && event.previous_hash.is_some() {
            return Err(StorageError::ChainBroken(
                "first lifecycle event links to a predecessor".to_string(),
            ));
        }
        if i > 0 {
            let prior = sorted[i - 1];
            if prior.id + 1 == event.id && event.previous_hash.as_deref() != Some(&prior.hash) {
                return Err(StorageError::ChainBroken(format!(
                    "lifecycle event {} does not link to event {}",
                    event.id, prior.id
                )));
            }
        }
    }
    Ok(())
}
