//! In-memory storage adapter.
//!
//! Used by tests and by the operator binary when no database is configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use selfext_types::{
    LifecycleAppend, LifecycleEvent, LifecycleEventType, LifecycleReceipt, PromotionControlState,
};

use tracing::debug;

use crate::chain::compute_event_hash;
use crate::normalize::normalize;
use crate::traits::{LifecycleLedger, PromotionControlStore, QueryWindow};
use crate::{StorageError, StorageResult};

#[derive(Default)]
pub struct InMemoryStore {
    events: RwLock<Vec<LifecycleEvent>>,
    control: RwLock<Option<PromotionControlState>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a backend error, as an unreachable
    /// database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Backend("storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LifecycleLedger for InMemoryStore {
    async fn append(&self, event: LifecycleAppend) -> StorageResult<LifecycleReceipt> {
        self.check_available()?;
        let mut guard = self
            .events
            .write()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;

        let pending = normalize(event, Utc::now());
        let id = guard.len() as i64 + 1;
        let previous_hash = guard.last().map(|e| e.hash.clone());
        let hash = compute_event_hash(id, &pending, previous_hash.as_deref());
        let stored = pending.into_event(id, previous_hash, hash);
        let receipt = stored.receipt();
        debug!(id, run_id = %receipt.run_id, event_type = %receipt.event_type, "Appended lifecycle event");
        guard.push(stored);
        Ok(receipt)
    }

    async fn list_run(&self, run_id: &str) -> StorageResult<Vec<LifecycleEvent>> {
        let guard = self
            .events
            .read()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;
        Ok(guard.iter().filter(|e| e.run_id == run_id).cloned().collect())
    }

    async fn list_recent(&self, window: QueryWindow) -> StorageResult<Vec<LifecycleEvent>> {
        let guard = self
            .events
            .read()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;
        Ok(apply_window(guard.iter().rev().cloned().collect(), window))
    }

    async fn latest_per_run(&self, window: QueryWindow) -> StorageResult<Vec<LifecycleEvent>> {
        let guard = self
            .events
            .read()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;
        let mut latest: HashMap<&str, &LifecycleEvent> = HashMap::new();
        for event in guard.iter() {
            latest.insert(event.run_id.as_str(), event);
        }
        let mut rows: Vec<LifecycleEvent> = latest.into_values().cloned().collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(apply_window(rows, window))
    }

    async fn latest_of_type(
        &self,
        event_type: LifecycleEventType,
    ) -> StorageResult<Option<LifecycleEvent>> {
        let guard = self
            .events
            .read()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .rev()
            .find(|e| e.event_type == event_type)
            .cloned())
    }
}

#[async_trait]
impl PromotionControlStore for InMemoryStore {
    async fn get_control(&self) -> StorageResult<Option<PromotionControlState>> {
        let guard = self
            .control
            .read()
            .map_err(|_| StorageError::Backend("control lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    async fn put_control(&self, state: PromotionControlState) -> StorageResult<()> {
        self.check_available()?;
        let mut guard = self
            .control
            .write()
            .map_err(|_| StorageError::Backend("control lock poisoned".to_string()))?;
        *guard = Some(state);
        Ok(())
    }
}

pub(crate) fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::verify_chain;
    use selfext_types::ExecutionContext;
    use serde_json::json;

    #[tokio::test]
    async fn append_returns_receipt_and_links_hashes() {
        let store = InMemoryStore::new();
        let first = store
            .append(LifecycleAppend::new(LifecycleEventType::Proposed).run("r1"))
            .await
            .unwrap();
        let second = store
            .append(
                LifecycleAppend::new(LifecycleEventType::Tested)
                    .run("r1")
                    .stage("sandbox"),
            )
            .await
            .unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(second.stage, "sandbox");

        let events = store.list_run("r1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].previous_hash.as_deref(), Some(events[0].hash.as_str()));
        assert!(verify_chain(&events).is_ok());
    }

    #[tokio::test]
    async fn blank_stage_stored_as_event_type() {
        let store = InMemoryStore::new();
        let receipt = store
            .append(LifecycleAppend::new(LifecycleEventType::PromotionBlocked).stage(""))
            .await
            .unwrap();
        assert_eq!(receipt.stage, "promotion_blocked");
        assert_eq!(receipt.run_id, "unknown-run");
    }

    #[tokio::test]
    async fn latest_per_run_and_type() {
        let store = InMemoryStore::new();
        let ctx = ExecutionContext::new("weather");
        for (run, ty) in [
            ("a", LifecycleEventType::Proposed),
            ("b", LifecycleEventType::Proposed),
            ("a", LifecycleEventType::Tested),
            ("b", LifecycleEventType::Failed),
            ("a", LifecycleEventType::Promoted),
        ] {
            store
                .append(
                    LifecycleAppend::new(ty)
                        .run(run)
                        .context(&ctx)
                        .payload(json!({"run": run})),
                )
                .await
                .unwrap();
        }

        let latest = store.latest_per_run(QueryWindow::all()).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].run_id, "a");
        assert_eq!(latest[0].event_type, LifecycleEventType::Promoted);
        assert_eq!(latest[1].event_type, LifecycleEventType::Failed);

        let recent = store.list_recent(QueryWindow::latest(2)).await.unwrap();
        assert_eq!(recent.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 4]);

        let proposed = store
            .latest_of_type(LifecycleEventType::Proposed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proposed.run_id, "b");
        assert!(store
            .latest_of_type(LifecycleEventType::RolledBack)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn control_round_trip_and_first_use() {
        let store = InMemoryStore::new();
        assert!(store.get_control().await.unwrap().is_none());
        let state = PromotionControlState {
            paused: true,
            reason: Some("incident".into()),
            updated_by: Some("ops".into()),
            updated_at: Some(Utc::now()),
        };
        store.put_control(state.clone()).await.unwrap();
        assert_eq!(store.get_control().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn unavailable_store_fails_writes() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .append(LifecycleAppend::new(LifecycleEventType::Proposed))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        store.set_unavailable(false);
        assert!(store
            .append(LifecycleAppend::new(LifecycleEventType::Proposed))
            .await
            .is_ok());
    }
}
