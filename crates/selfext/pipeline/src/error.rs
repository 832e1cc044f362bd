//! Error types for the pipeline

use selfext_promotion::PromotionError;
use selfext_rollback::RollbackError;
use selfext_storage::StorageError;
use selfext_types::LifecycleEventType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required component was not supplied to the builder
    #[error("pipeline is missing its {0}")]
    MissingComponent(&'static str),

    #[error("tool '{0}' is already registered")]
    ToolAlreadyRegistered(String),

    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),

    /// The run has not reached a state from which it can be promoted
    #[error("run {run_id} cannot be promoted: {reason}")]
    NotPromotable { run_id: String, reason: String },

    /// The action completed but its ledger event could not be written
    #[error("failed to record {event_type} for run {run_id}: {source}")]
    LedgerWrite {
        run_id: String,
        event_type: LifecycleEventType,
        #[source]
        source: StorageError,
    },

    #[error("ledger error: {0}")]
    Storage(#[from] StorageError),

    #[error("promotion control error: {0}")]
    Promotion(#[from] PromotionError),

    #[error("rollback error: {0}")]
    Rollback(#[from] RollbackError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
