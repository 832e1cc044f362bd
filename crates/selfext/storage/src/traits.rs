use async_trait::async_trait;
use selfext_types::{
    LifecycleAppend, LifecycleEvent, LifecycleEventType, LifecycleReceipt, PromotionControlState,
};

use crate::StorageResult;

/// Generic query window for paged reads. `limit == 0` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn latest(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

/// Append-only record of lifecycle transitions.
#[async_trait]
pub trait LifecycleLedger: Send + Sync {
    /// Normalize and append one event, returning its receipt.
    async fn append(&self, event: LifecycleAppend) -> StorageResult<LifecycleReceipt>;

    /// Every event of one run, oldest first.
    async fn list_run(&self, run_id: &str) -> StorageResult<Vec<LifecycleEvent>>;

    /// All events, newest first.
    async fn list_recent(&self, window: QueryWindow) -> StorageResult<Vec<LifecycleEvent>>;

    /// The newest event of each run, newest run activity first.
    async fn latest_per_run(&self, window: QueryWindow) -> StorageResult<Vec<LifecycleEvent>>;

    /// The newest event of a given type, if any.
    async fn latest_of_type(
        &self,
        event_type: LifecycleEventType,
    ) -> StorageResult<Option<LifecycleEvent>>;
}

/// Persistence for the single promotion-control record.
#[async_trait]
pub trait PromotionControlStore: Send + Sync {
    /// Stored state, or `None` if it was never set.
    async fn get_control(&self) -> StorageResult<Option<PromotionControlState>>;

    /// Upsert the record.
    async fn put_control(&self, state: PromotionControlState) -> StorageResult<()>;
}

/// Full storage surface used by the pipeline.
pub trait SelfExtensionStorage: LifecycleLedger + PromotionControlStore {}

impl<T> SelfExtensionStorage for T where T: LifecycleLedger + PromotionControlStore {}
