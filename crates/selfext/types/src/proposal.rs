use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A candidate modification to one tool.
///
/// Ephemeral: produced by the agent, consumed by a single staging attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeProposal {
    /// Tool whose implementation is being replaced or created.
    pub tool_name: String,
    /// Repository-relative path of the tool source.
    pub file_path: PathBuf,
    /// Complete new source of the tool.
    pub new_content: String,
    /// Input passed to the tool's `execute` entry point in the sandbox.
    #[serde(default)]
    pub test_input: Value,
}

impl ChangeProposal {
    pub fn new(
        tool_name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        new_content: impl Into<String>,
        test_input: Value,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            file_path: file_path.into(),
            new_content: new_content.into(),
            test_input,
        }
    }
}
