use std::time::Duration;

use async_trait::async_trait;
use selfext_types::SandboxResult;
use serde_json::Value;

/// Trait for executing a compiled candidate against a test input.
///
/// `run` is total: crashes, hangs, and launch failures all come back as
/// `SandboxResult { passed: false, .. }`.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(
        &self,
        code: &str,
        tool_name: &str,
        input: &Value,
        timeout: Duration,
    ) -> SandboxResult;

    /// Name of this sandbox for logging.
    fn name(&self) -> &str;
}
