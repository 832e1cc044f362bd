//! Operator pause switch over the single promotion-control record.

use std::sync::Arc;

use chrono::Utc;
use selfext_storage::{LifecycleLedger, PromotionControlStore};
use selfext_types::{
    LifecycleAppend, LifecycleEventType, PromotionControlState, PromotionControlUpdate,
};
use serde_json::json;
use tracing::{error, info};

use crate::error::{PromotionError, PromotionResult};

/// Run id under which control changes are recorded in the ledger.
pub const CONTROL_RUN_ID: &str = "promotion-control";

/// Reads and writes the promotion pause state, auditing every change.
pub struct PromotionControl {
    store: Arc<dyn PromotionControlStore>,
    ledger: Arc<dyn LifecycleLedger>,
}

impl PromotionControl {
    pub fn new(store: Arc<dyn PromotionControlStore>, ledger: Arc<dyn LifecycleLedger>) -> Self {
        Self { store, ledger }
    }

    /// Current state; the unpaused default if never set.
    pub async fn get(&self) -> PromotionResult<PromotionControlState> {
        Ok(self.store.get_control().await?.unwrap_or_default())
    }

    /// Normalize, store, and audit an update.
    ///
    /// A ledger failure is returned as [`PromotionError::LedgerWrite`]; the
    /// stored state stays in effect.
    pub async fn set(&self, update: PromotionControlUpdate) -> PromotionResult<PromotionControlState> {
        let state = update.normalize(Utc::now());
        self.store.put_control(state.clone()).await?;

        info!(
            paused = state.paused,
            reason = state.reason.as_deref().unwrap_or_default(),
            updated_by = state.updated_by.as_deref().unwrap_or_default(),
            "Promotion control updated"
        );

        let mut append = LifecycleAppend::new(LifecycleEventType::PromotionPauseChanged)
            .run(CONTROL_RUN_ID)
            .stage("control")
            .payload(json!({
                "paused": state.paused,
                "reason": state.reason,
                "updatedBy": state.updated_by,
                "updatedAt": state.updated_at,
            }));
        if let Some(by) = &state.updated_by {
            append = append.actor(by.clone());
        }

        if let Err(source) = self.ledger.append(append).await {
            error!(error = %source, "Failed to record promotion control change");
            return Err(PromotionError::LedgerWrite { state, source });
        }
        Ok(state)
    }

    /// Pause promotion. The reason is mandatory.
    pub async fn pause(
        &self,
        reason: &str,
        updated_by: Option<&str>,
    ) -> PromotionResult<PromotionControlState> {
        if reason.trim().is_empty() {
            return Err(PromotionError::ReasonRequired);
        }
        let mut update = PromotionControlUpdate::pause(reason);
        if let Some(by) = updated_by {
            update = update.by(by);
        }
        self.set(update).await
    }

    pub async fn resume(&self, updated_by: Option<&str>) -> PromotionResult<PromotionControlState> {
        let mut update = PromotionControlUpdate::resume();
        if let Some(by) = updated_by {
            update = update.by(by);
        }
        self.set(update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfext_storage::InMemoryStore;

    fn control() -> (Arc<InMemoryStore>, PromotionControl) {
        let store = Arc::new(InMemoryStore::new());
        let control = PromotionControl::new(store.clone(), store.clone());
        (store, control)
    }

    #[tokio::test]
    async fn first_use_is_unpaused_default() {
        let (_, control) = control();
        assert_eq!(control.get().await.unwrap(), PromotionControlState::default());
    }

    #[tokio::test]
    async fn unpause_discards_reason() {
        let (_, control) = control();
        let update = PromotionControlUpdate {
            paused: false,
            reason: Some("ignored".into()),
            ..Default::default()
        };
        control.set(update).await.unwrap();
        let state = control.get().await.unwrap();
        assert!(!state.paused);
        assert_eq!(state.reason, None);
        assert!(state.updated_at.is_some());
    }

    #[tokio::test]
    async fn pause_is_audited() {
        let (store, control) = control();
        let state = control.pause("incident 7", Some("ops")).await.unwrap();
        assert!(state.paused);
        assert_eq!(state.reason.as_deref(), Some("incident 7"));

        let events = store.list_run(CONTROL_RUN_ID).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, LifecycleEventType::PromotionPauseChanged);
        assert_eq!(events[0].actor_source, "ops");
        assert_eq!(events[0].payload["reason"], "incident 7");
    }

    #[tokio::test]
    async fn pause_requires_reason() {
        let (_, control) = control();
        assert!(matches!(
            control.pause("   ", None).await,
            Err(PromotionError::ReasonRequired)
        ));
        assert!(!control.get().await.unwrap().paused);
    }

    #[tokio::test]
    async fn ledger_failure_keeps_state() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(InMemoryStore::new());
        ledger.set_unavailable(true);
        let control = PromotionControl::new(store.clone(), ledger);

        let err = control.pause("deploy freeze", None).await.unwrap_err();
        match err {
            PromotionError::LedgerWrite { state, .. } => assert!(state.paused),
            other => panic!("unexpected error: {other}"),
        }
        assert!(control.get().await.unwrap().paused);
    }

    #[tokio::test]
    async fn resume_after_pause() {
        let (store, control) = control();
        control.pause("x", None).await.unwrap();
        let state = control.resume(Some("ops")).await.unwrap();
        assert!(!state.paused);
        assert_eq!(store.list_run(CONTROL_RUN_ID).await.unwrap().len(), 2);
    }
}
