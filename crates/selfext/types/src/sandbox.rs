use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one sandboxed test execution.
///
/// Always a value, never an error: crashes, hangs, and spawn failures are
/// folded into `passed = false` with a descriptive `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SandboxResult {
    pub fn passed(output: Option<Value>) -> Self {
        Self {
            passed: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Error text, or a generic message when a failure carried none.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "sandbox test failed without an error message".to_string())
    }
}
