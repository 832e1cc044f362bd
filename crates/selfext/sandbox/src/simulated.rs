use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use selfext_types::SandboxResult;
use serde_json::Value;

use crate::sandbox::Sandbox;

/// One recorded invocation of a [`SimulatedSandbox`].
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedRun {
    pub code: String,
    pub tool_name: String,
    pub input: Value,
}

/// A simulated sandbox with a fixed verdict that records every call.
pub struct SimulatedSandbox {
    result: SandboxResult,
    runs: Mutex<Vec<SimulatedRun>>,
}

impl SimulatedSandbox {
    pub fn passing() -> Self {
        Self::with_result(SandboxResult::passed(None))
    }

    pub fn passing_with(output: Value) -> Self {
        Self::with_result(SandboxResult::passed(Some(output)))
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self::with_result(SandboxResult::failed(error))
    }

    pub fn with_result(result: SandboxResult) -> Self {
        Self {
            result,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> Vec<SimulatedRun> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sandbox for SimulatedSandbox {
    async fn run(
        &self,
        code: &str,
        tool_name: &str,
        input: &Value,
        _timeout: Duration,
    ) -> SandboxResult {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SimulatedRun {
                code: code.to_string(),
                tool_name: tool_name.to_string(),
                input: input.clone(),
            });
        self.result.clone()
    }

    fn name(&self) -> &str {
        "simulated-sandbox"
    }
}
