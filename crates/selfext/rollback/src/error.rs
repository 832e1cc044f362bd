use selfext_staging::StagingError;
use selfext_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("no known-good baseline has been confirmed")]
    NoBaseline,

    #[error("baseline {baseline} is not an ancestor of {head}; refusing to rewrite unrelated history")]
    BaselineNotAncestor { baseline: String, head: String },

    #[error("git error during restore: {0}")]
    Git(#[from] StagingError),

    #[error("ledger error: {0}")]
    Ledger(#[from] StorageError),

    #[error("restore failed: {0}")]
    Restore(String),
}

pub type RollbackResult<T> = Result<T, RollbackError>;
