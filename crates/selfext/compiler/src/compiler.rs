use async_trait::async_trait;

use crate::error::CompilationError;

/// Output of a successful compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledModule {
    /// Executable module text, in the sandbox runtime's native format.
    pub code: String,
    /// Non-fatal diagnostics.
    pub warnings: Vec<String>,
}

impl CompiledModule {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            warnings: vec![],
        }
    }
}

/// Trait for turning candidate source into an executable module.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile `source` entirely in memory.
    async fn compile(&self, source: &str) -> Result<CompiledModule, CompilationError>;

    /// Name of this compiler for logging.
    fn name(&self) -> &str;
}
