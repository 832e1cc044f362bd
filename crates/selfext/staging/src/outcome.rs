use selfext_types::SandboxResult;
use serde::{Deserialize, Serialize};

use crate::error::StagingError;

/// Why a staging attempt did not land.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailure {
    /// The target file has uncommitted changes.
    DirtyWorkingTree,
    /// HEAD is not on a branch.
    DetachedHead,
    /// The candidate is identical to the committed file.
    NoChange,
    Compilation,
    Sandbox,
    /// The original branch moved during staging.
    MergeRejected,
    Git,
    Io,
}

impl StageFailure {
    /// Ledger `stage` label for a `failed` event.
    pub fn ledger_stage(&self) -> &'static str {
        match self {
            Self::DirtyWorkingTree | Self::DetachedHead | Self::NoChange => "precondition",
            Self::Compilation => "compile",
            Self::Sandbox => "sandbox",
            Self::MergeRejected => "merge",
            Self::Git | Self::Io => "git",
        }
    }
}

impl From<&StagingError> for StageFailure {
    fn from(err: &StagingError) -> Self {
        match err {
            StagingError::DetachedHead => Self::DetachedHead,
            StagingError::Io { .. } | StagingError::InvalidPath(_) => Self::Io,
            StagingError::Git { .. } | StagingError::Spawn(_) => Self::Git,
        }
    }
}

/// Result of one `stage()` call. Never an error: failures are described here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    /// Staging branch used for this attempt.
    pub branch: String,
    /// Branch the repository was on (and is back on).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_branch: Option<String>,
    /// Staging commit; on success, the new tip of the original branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxResult>,
}

impl StageOutcome {
    pub(crate) fn new(branch: &str) -> Self {
        Self {
            success: false,
            error: None,
            failure: None,
            branch: branch.to_string(),
            original_branch: None,
            commit: None,
            warnings: vec![],
            sandbox: None,
        }
    }

    pub(crate) fn fail(mut self, failure: StageFailure, error: impl Into<String>) -> Self {
        self.success = false;
        self.failure = Some(failure);
        self.error = Some(error.into());
        self
    }

    pub(crate) fn succeed(mut self) -> Self {
        self.success = true;
        self.failure = None;
        self.error = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_stage_labels() {
        assert_eq!(StageFailure::Compilation.ledger_stage(), "compile");
        assert_eq!(StageFailure::Sandbox.ledger_stage(), "sandbox");
        assert_eq!(StageFailure::DirtyWorkingTree.ledger_stage(), "precondition");
        assert_eq!(StageFailure::MergeRejected.ledger_stage(), "merge");
        assert_eq!(StageFailure::Io.ledger_stage(), "git");
    }

    #[test]
    fn failure_serializes_snake_case() {
        let outcome = StageOutcome::new("b").fail(StageFailure::MergeRejected, "diverged");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["failure"], "merge_rejected");
        assert_eq!(json["success"], false);
        assert!(json.get("commit").is_none());
    }

    #[test]
    fn error_maps_to_failure() {
        assert_eq!(
            StageFailure::from(&StagingError::DetachedHead),
            StageFailure::DetachedHead
        );
        let git = StagingError::Git {
            command: "commit".into(),
            message: "x".into(),
        };
        assert_eq!(StageFailure::from(&git), StageFailure::Git);
    }
}
