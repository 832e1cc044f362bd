//! Baseline restorers: the trait, a git implementation, and a simulated one.
//!
//! The `BaselineRestorer` trait abstracts how the running system is brought
//! back to a known-good baseline. `GitBaselineRestorer` reverts history on the
//! baseline branch; `SimulatedRestorer` returns configurable results.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use selfext_staging::GitRepository;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::baseline::KnownGoodBaseline;
use crate::error::{RollbackError, RollbackResult};

// ── Restore Report ─────────────────────────────────────────────────────

/// What a successful restore changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// Tip of the baseline branch before the restore.
    pub previous_head: String,
    /// Tip after the restore; its tree equals the baseline's.
    pub restored_head: String,
    /// Whether any commit had to be reverted.
    pub changed: bool,
}

// ── BaselineRestorer Trait ─────────────────────────────────────────────

/// Trait for returning the system to a known-good baseline.
#[async_trait]
pub trait BaselineRestorer: Send + Sync {
    async fn restore(&self, baseline: &KnownGoodBaseline) -> RollbackResult<RestoreReport>;

    /// Name of this restorer for logging.
    fn name(&self) -> &str;
}

// ── Git Restorer ───────────────────────────────────────────────────────

/// Reverts `baseline..HEAD` on the baseline branch as new commits.
///
/// History is preserved: nothing is reset or force-pushed. The repository
/// is returned to the branch it was on. The restore holds the repository's
/// working-tree lock, so it never runs in the middle of a stage on a clone of
/// the same [`GitRepository`].
pub struct GitBaselineRestorer {
    repo: GitRepository,
}

impl GitBaselineRestorer {
    pub fn new(repo: GitRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl BaselineRestorer for GitBaselineRestorer {
    async fn restore(&self, baseline: &KnownGoodBaseline) -> RollbackResult<RestoreReport> {
        let _guard = self.repo.lock_worktree().await;
        let original = self.repo.current_branch().await?;
        let switched = original != baseline.branch;
        if switched {
            self.repo.checkout(&baseline.branch).await?;
        }

        let result = self.revert(baseline).await;

        if switched {
            if let Err(e) = self.repo.checkout(&original).await {
                warn!(original = %original, error = %e, "Failed to return to original branch after restore");
            }
        }
        result
    }

    fn name(&self) -> &str {
        "git-revert"
    }
}

impl GitBaselineRestorer {
    async fn revert(&self, baseline: &KnownGoodBaseline) -> RollbackResult<RestoreReport> {
        let head = self.repo.head_commit().await?;
        let target = self.repo.rev_parse(&baseline.commit).await?;
        if head == target {
            return Ok(RestoreReport {
                previous_head: head.clone(),
                restored_head: head,
                changed: false,
            });
        }
        if !self.repo.is_ancestor(&target, &head).await? {
            return Err(RollbackError::BaselineNotAncestor {
                baseline: target,
                head,
            });
        }

        let restored = self.repo.revert_to(&target).await?;
        info!(
            branch = %baseline.branch,
            baseline = %target,
            previous_head = %head,
            restored_head = %restored,
            "Reverted to known-good baseline"
        );
        Ok(RestoreReport {
            previous_head: head,
            restored_head: restored,
            changed: true,
        })
    }
}

// ── Simulated Restorer ─────────────────────────────────────────────────

/// A simulated restorer for testing. Records every baseline it was asked to
/// restore.
pub struct SimulatedRestorer {
    failure: Option<String>,
    restored: Mutex<Vec<KnownGoodBaseline>>,
}

impl SimulatedRestorer {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            restored: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            restored: Mutex::new(Vec::new()),
        }
    }

    pub fn restored(&self) -> Vec<KnownGoodBaseline> {
        self.restored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BaselineRestorer for SimulatedRestorer {
    async fn restore(&self, baseline: &KnownGoodBaseline) -> RollbackResult<RestoreReport> {
        self.restored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(baseline.clone());
        match &self.failure {
            Some(message) => Err(RollbackError::Restore(message.clone())),
            None => Ok(RestoreReport {
                previous_head: "simulated-head".into(),
                restored_head: baseline.commit.clone(),
                changed: true,
            }),
        }
    }

    fn name(&self) -> &str {
        "simulated-restorer"
    }
}
