//! Health-window handling and rollback runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use selfext_storage::LifecycleLedger;
use selfext_types::{LifecycleAppend, LifecycleEventType};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::baseline::{HealthVerdict, KnownGoodBaseline};
use crate::error::{RollbackError, RollbackResult};
use crate::restorer::{BaselineRestorer, RestoreReport};

const ACTOR: &str = "rollback-coordinator";

/// What recording a health verdict led to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HealthOutcome {
    BaselineConfirmed {
        baseline: KnownGoodBaseline,
    },
    RolledBack {
        rollback_run_id: String,
        baseline: KnownGoodBaseline,
        report: RestoreReport,
    },
    RollbackFailed {
        rollback_run_id: String,
        error: String,
    },
}

/// Tracks the known-good baseline and runs rollbacks on failed health windows.
pub struct RollbackCoordinator {
    ledger: Arc<dyn LifecycleLedger>,
    restorer: Arc<dyn BaselineRestorer>,
    baseline: RwLock<Option<KnownGoodBaseline>>,
    in_progress: AtomicBool,
    serial: Mutex<()>,
}

impl RollbackCoordinator {
    pub fn new(ledger: Arc<dyn LifecycleLedger>, restorer: Arc<dyn BaselineRestorer>) -> Self {
        Self {
            ledger,
            restorer,
            baseline: RwLock::new(None),
            in_progress: AtomicBool::new(false),
            serial: Mutex::new(()),
        }
    }

    /// Create a coordinator whose baseline is the latest
    /// `health_window_passed` event in the ledger.
    pub async fn recover(
        ledger: Arc<dyn LifecycleLedger>,
        restorer: Arc<dyn BaselineRestorer>,
    ) -> RollbackResult<Self> {
        let latest = ledger
            .latest_of_type(LifecycleEventType::HealthWindowPassed)
            .await?;
        let baseline = latest.as_ref().and_then(KnownGoodBaseline::from_event);
        if let Some(b) = &baseline {
            info!(commit = %b.commit, branch = %b.branch, run_id = %b.run_id, "Recovered known-good baseline");
        }
        let coordinator = Self::new(ledger, restorer);
        *coordinator.baseline.write().await = baseline;
        Ok(coordinator)
    }

    pub async fn baseline(&self) -> Option<KnownGoodBaseline> {
        self.baseline.read().await.clone()
    }

    /// Seed the baseline without a health window, e.g. at first deployment.
    pub async fn set_baseline(&self, baseline: KnownGoodBaseline) {
        *self.baseline.write().await = Some(baseline);
    }

    pub fn rollback_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Record a verdict and, on failure, roll back to the baseline.
    ///
    /// Verdicts are processed one at a time. Ledger write failures are
    /// returned as errors.
    pub async fn record_health_window(
        &self,
        verdict: &HealthVerdict,
    ) -> RollbackResult<HealthOutcome> {
        let _serial = self.serial.lock().await;
        if verdict.passed {
            self.confirm(verdict).await
        } else {
            self.roll_back(verdict).await
        }
    }

    async fn confirm(&self, verdict: &HealthVerdict) -> RollbackResult<HealthOutcome> {
        let receipt = self
            .ledger
            .append(
                LifecycleAppend::new(LifecycleEventType::HealthWindowPassed)
                    .run(&verdict.run_id)
                    .stage("health")
                    .actor(ACTOR)
                    .payload(json!({
                        "commit": verdict.commit,
                        "branch": verdict.branch,
                        "detail": verdict.detail,
                    })),
            )
            .await?;

        let baseline = KnownGoodBaseline {
            commit: verdict.commit.clone(),
            branch: verdict.branch.clone(),
            run_id: receipt.run_id,
            confirmed_at: receipt.created_at,
        };
        info!(run_id = %baseline.run_id, commit = %baseline.commit, "Health window passed; baseline advanced");
        *self.baseline.write().await = Some(baseline.clone());
        Ok(HealthOutcome::BaselineConfirmed { baseline })
    }

    async fn roll_back(&self, verdict: &HealthVerdict) -> RollbackResult<HealthOutcome> {
        self.ledger
            .append(
                LifecycleAppend::new(LifecycleEventType::HealthWindowFailed)
                    .run(&verdict.run_id)
                    .stage("health")
                    .actor(ACTOR)
                    .payload(json!({
                        "commit": verdict.commit,
                        "branch": verdict.branch,
                        "detail": verdict.detail,
                    })),
            )
            .await?;
        warn!(run_id = %verdict.run_id, commit = %verdict.commit, "Health window failed");

        let _flag = InProgress::set(&self.in_progress);
        let rollback_run_id = format!("rollback-{}", Uuid::new_v4());
        let baseline = self.baseline().await;

        self.ledger
            .append(
                LifecycleAppend::new(LifecycleEventType::RollbackStarted)
                    .run(&rollback_run_id)
                    .correlation(&verdict.run_id)
                    .stage("rollback")
                    .actor(ACTOR)
                    .payload(json!({
                        "failedCommit": verdict.commit,
                        "baseline": baseline,
                        "restorer": self.restorer.name(),
                    })),
            )
            .await?;

        let Some(baseline) = baseline else {
            return self
                .fail_rollback(rollback_run_id, &verdict.run_id, RollbackError::NoBaseline)
                .await;
        };

        match self.restorer.restore(&baseline).await {
            Ok(report) => {
                self.ledger
                    .append(
                        LifecycleAppend::new(LifecycleEventType::RolledBack)
                            .run(&rollback_run_id)
                            .correlation(&verdict.run_id)
                            .stage("rollback")
                            .actor(ACTOR)
                            .payload(json!({
                                "baseline": baseline,
                                "report": report,
                            })),
                    )
                    .await?;
                info!(
                    rollback_run_id = %rollback_run_id,
                    baseline = %baseline.commit,
                    "Rolled back to known-good baseline"
                );
                Ok(HealthOutcome::RolledBack {
                    rollback_run_id,
                    baseline,
                    report,
                })
            }
            Err(e) => self.fail_rollback(rollback_run_id, &verdict.run_id, e).await,
        }
    }

    async fn fail_rollback(
        &self,
        rollback_run_id: String,
        failed_run_id: &str,
        cause: RollbackError,
    ) -> RollbackResult<HealthOutcome> {
        let error = cause.to_string();
        error!(rollback_run_id = %rollback_run_id, error = %error, "Rollback failed");
        self.ledger
            .append(
                LifecycleAppend::new(LifecycleEventType::RollbackFailed)
                    .run(&rollback_run_id)
                    .correlation(failed_run_id)
                    .stage("rollback")
                    .actor(ACTOR)
                    .payload(json!({ "error": error })),
            )
            .await?;
        Ok(HealthOutcome::RollbackFailed {
            rollback_run_id,
            error,
        })
    }
}

struct InProgress<'a>(&'a AtomicBool);

impl<'a> InProgress<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restorer::SimulatedRestorer;
    use selfext_storage::{InMemoryStore, QueryWindow};

    fn setup(
        restorer: SimulatedRestorer,
    ) -> (Arc<InMemoryStore>, Arc<SimulatedRestorer>, RollbackCoordinator) {
        let store = Arc::new(InMemoryStore::new());
        let restorer = Arc::new(restorer);
        let coordinator = RollbackCoordinator::new(store.clone(), restorer.clone());
        (store, restorer, coordinator)
    }

    async fn rollback_events(store: &InMemoryStore, run_id: &str) -> Vec<LifecycleEventType> {
        store
            .list_run(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[tokio::test]
    async fn passing_window_advances_baseline() {
        let (store, _, coordinator) = setup(SimulatedRestorer::succeeding());
        let outcome = coordinator
            .record_health_window(&HealthVerdict::passed("run-1", "aaa", "main"))
            .await
            .unwrap();

        let baseline = coordinator.baseline().await.unwrap();
        assert_eq!(baseline.commit, "aaa");
        assert_eq!(baseline.run_id, "run-1");
        assert_eq!(outcome, HealthOutcome::BaselineConfirmed { baseline });
        assert_eq!(
            rollback_events(&store, "run-1").await,
            vec![LifecycleEventType::HealthWindowPassed]
        );
    }

    #[tokio::test]
    async fn failing_window_rolls_back_to_baseline() {
        let (store, restorer, coordinator) = setup(SimulatedRestorer::succeeding());
        coordinator
            .record_health_window(&HealthVerdict::passed("run-1", "aaa", "main"))
            .await
            .unwrap();

        let outcome = coordinator
            .record_health_window(&HealthVerdict::failed("run-2", "bbb", "main", "error rate"))
            .await
            .unwrap();

        let HealthOutcome::RolledBack {
            rollback_run_id,
            baseline,
            report,
        } = outcome
        else {
            panic!("expected rollback, got {outcome:?}");
        };
        assert!(rollback_run_id.starts_with("rollback-"));
        assert_eq!(baseline.commit, "aaa");
        assert_eq!(report.restored_head, "aaa");
        assert_eq!(restorer.restored().len(), 1);
        assert!(!coordinator.rollback_in_progress());

        assert_eq!(
            rollback_events(&store, &rollback_run_id).await,
            vec![
                LifecycleEventType::RollbackStarted,
                LifecycleEventType::RolledBack
            ]
        );
        let events = store.list_run(&rollback_run_id).await.unwrap();
        assert!(events
            .iter()
            .all(|e| e.correlation_id.as_deref() == Some("run-2")));
        assert_eq!(
            rollback_events(&store, "run-2").await,
            vec![LifecycleEventType::HealthWindowFailed]
        );
        // A failed window never moves the baseline.
        assert_eq!(coordinator.baseline().await.unwrap().commit, "aaa");
    }

    #[tokio::test]
    async fn failing_window_without_baseline_records_failure() {
        let (store, restorer, coordinator) = setup(SimulatedRestorer::succeeding());
        let outcome = coordinator
            .record_health_window(&HealthVerdict::failed("run-1", "bbb", "main", "crash"))
            .await
            .unwrap();

        let HealthOutcome::RollbackFailed {
            rollback_run_id,
            error,
        } = outcome
        else {
            panic!("expected rollback failure, got {outcome:?}");
        };
        assert!(error.contains("no known-good baseline"));
        assert!(restorer.restored().is_empty());
        assert_eq!(
            rollback_events(&store, &rollback_run_id).await,
            vec![
                LifecycleEventType::RollbackStarted,
                LifecycleEventType::RollbackFailed
            ]
        );
    }

    #[tokio::test]
    async fn restorer_failure_records_rollback_failed() {
        let (store, _, coordinator) = setup(SimulatedRestorer::failing("revert conflict"));
        coordinator
            .record_health_window(&HealthVerdict::passed("run-1", "aaa", "main"))
            .await
            .unwrap();
        let outcome = coordinator
            .record_health_window(&HealthVerdict::failed("run-2", "bbb", "main", "slow"))
            .await
            .unwrap();

        let HealthOutcome::RollbackFailed { error, .. } = outcome else {
            panic!("expected rollback failure");
        };
        assert!(error.contains("revert conflict"));

        let latest = store
            .latest_of_type(LifecycleEventType::RollbackFailed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.payload["error"], error.as_str());
        assert!(!coordinator.rollback_in_progress());
    }

    #[tokio::test]
    async fn recover_rebuilds_baseline_from_ledger() {
        let (store, _, coordinator) = setup(SimulatedRestorer::succeeding());
        coordinator
            .record_health_window(&HealthVerdict::passed("run-1", "aaa", "main"))
            .await
            .unwrap();
        coordinator
            .record_health_window(&HealthVerdict::passed("run-2", "bbb", "main"))
            .await
            .unwrap();
        drop(coordinator);

        let recovered =
            RollbackCoordinator::recover(store.clone(), Arc::new(SimulatedRestorer::succeeding()))
                .await
                .unwrap();
        let baseline = recovered.baseline().await.unwrap();
        assert_eq!(baseline.commit, "bbb");
        assert_eq!(baseline.run_id, "run-2");
    }

    #[tokio::test]
    async fn ledger_outage_is_surfaced() {
        let (store, _, coordinator) = setup(SimulatedRestorer::succeeding());
        store.set_unavailable(true);
        let err = coordinator
            .record_health_window(&HealthVerdict::passed("run-1", "aaa", "main"))
            .await
            .unwrap_err();
        assert!(matches!(err, RollbackError::Ledger(_)));
        assert!(coordinator.baseline().await.is_none());
        store.set_unavailable(false);
        assert!(store
            .list_recent(QueryWindow::all())
            .await
            .unwrap()
            .is_empty());
    }
}
