use std::path::PathBuf;

use thiserror::Error;

/// Errors from git and filesystem operations during staging.
#[derive(Debug, Error)]
pub enum StagingError {
    /// git ran and exited non-zero.
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    /// git could not be started.
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("repository HEAD is detached; staging needs a branch to return to")]
    DetachedHead,

    #[error("invalid tool file path {0}: must be relative and inside the repository")]
    InvalidPath(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for staging operations.
pub type StagingResult<T> = Result<T, StagingError>;
