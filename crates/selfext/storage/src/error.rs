//! Ledger and control-record errors.

use thiserror::Error;

/// Errors from the lifecycle ledger and the promotion-control record.
///
/// Appends are never rejected for their content; inputs are normalized.
/// Every variant describes the backend or data already stored.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A row with the same id was written concurrently.
    #[error("ledger row conflict: {0}")]
    Conflict(String),

    /// Stored rows no longer form an intact hash chain.
    #[error("ledger hash chain broken: {0}")]
    ChainBroken(String),

    #[error("invalid storage configuration: {0}")]
    Config(String),

    /// A stored column could not be decoded.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    /// The backend is unreachable or the write failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
