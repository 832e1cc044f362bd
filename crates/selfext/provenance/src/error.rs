use thiserror::Error;

/// Errors raised when reading provenance back out of a commit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvenanceError {
    /// The commit message carries no metadata trailer.
    #[error("commit message has no self-extension metadata trailer")]
    MissingTrailer,

    /// The trailer is present but is not valid JSON.
    #[error("malformed self-extension metadata: {0}")]
    Malformed(String),

    /// The trailer parsed, but is not in canonical form.
    #[error("self-extension metadata is not canonical")]
    NonCanonical,
}

/// Result type for provenance operations.
pub type ProvenanceResult<T> = Result<T, ProvenanceError>;
