//! In-process compilers for trusted input and tests.

use async_trait::async_trait;

use crate::compiler::{CompiledModule, Compiler};
use crate::error::CompilationError;

/// Accepts source verbatim as the executable module.
#[derive(Clone, Debug, Default)]
pub struct PassthroughCompiler;

#[async_trait]
impl Compiler for PassthroughCompiler {
    async fn compile(&self, source: &str) -> Result<CompiledModule, CompilationError> {
        Ok(CompiledModule::new(source))
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// A simulated compiler with a fixed verdict.
pub struct SimulatedCompiler {
    diagnostics: Option<Vec<String>>,
    warnings: Vec<String>,
}

impl SimulatedCompiler {
    /// Accepts everything, returning the source unchanged.
    pub fn accepting() -> Self {
        Self {
            diagnostics: None,
            warnings: vec![],
        }
    }

    /// Accepts everything but reports the given warnings.
    pub fn warning(warnings: Vec<String>) -> Self {
        Self {
            diagnostics: None,
            warnings,
        }
    }

    /// Rejects everything with the given diagnostics.
    pub fn rejecting(diagnostics: Vec<String>) -> Self {
        Self {
            diagnostics: Some(diagnostics),
            warnings: vec![],
        }
    }
}

#[async_trait]
impl Compiler for SimulatedCompiler {
    async fn compile(&self, source: &str) -> Result<CompiledModule, CompilationError> {
        match &self.diagnostics {
            Some(diagnostics) => Err(CompilationError::new(diagnostics.clone())),
            None => Ok(CompiledModule {
                code: source.to_string(),
                warnings: self.warnings.clone(),
            }),
        }
    }

    fn name(&self) -> &str {
        "simulated-compiler"
    }
}
