use selfext_storage::StorageError;
use selfext_types::PromotionControlState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("a non-empty reason is required to pause promotion")]
    ReasonRequired,

    #[error("promotion control storage failed: {0}")]
    Storage(#[from] StorageError),

    /// The control state was stored but its audit event was not.
    /// `state` is what is now in effect.
    #[error("promotion control updated but the ledger write failed: {source}")]
    LedgerWrite {
        state: PromotionControlState,
        #[source]
        source: StorageError,
    },
}

pub type PromotionResult<T> = Result<T, PromotionError>;
