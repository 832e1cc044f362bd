use thiserror::Error;

/// Failures while preparing or launching a sandbox child.
///
/// Never escapes [`Sandbox::run`](crate::Sandbox::run); each variant is
/// folded into a failed `SandboxResult` using its `Display` text.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to write sandbox scratch file: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("failed to spawn sandbox runtime `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox process error: {0}")]
    Process(#[source] std::io::Error),
}
