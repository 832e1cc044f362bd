//! The self-extension pipeline.

use std::sync::Arc;

use selfext_promotion::{decide, evaluate, PromotionControl, PromotionDecision, PromotionGateResult};
use selfext_provenance::{build_branch_name, content_hash};
use selfext_rollback::{HealthOutcome, HealthVerdict, RollbackCoordinator};
use selfext_staging::{StageOutcome, StagingDeployer};
use selfext_storage::{LifecycleLedger, QueryWindow};
use selfext_types::{
    ChangeProposal, ExecutionContext, LifecycleAppend, LifecycleEvent, LifecycleEventType,
    LifecycleReceipt, PromotionControlState, StatusContext,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::registry::{ToolEntry, ToolRegistry};
use crate::status::{rollback_pending, OperatorStatus};

/// Result of one staging run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub run_id: String,
    pub outcome: StageOutcome,
}

/// Result of one promotion decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionReport {
    pub run_id: String,
    pub gate: PromotionGateResult,
    pub control: PromotionControlState,
    pub decision: PromotionDecision,
}

/// Stages, promotes, and rolls back tool changes, recording every step.
///
/// Built with [`SelfExtensionPipelineBuilder`](crate::SelfExtensionPipelineBuilder).
pub struct SelfExtensionPipeline {
    pub(crate) deployer: StagingDeployer,
    pub(crate) ledger: Arc<dyn LifecycleLedger>,
    pub(crate) control: PromotionControl,
    pub(crate) rollback: RollbackCoordinator,
    pub(crate) registry: RwLock<ToolRegistry>,
    pub(crate) required_contexts: Option<Vec<String>>,
    pub(crate) actor: String,
}

impl SelfExtensionPipeline {
    // ── Staging ────────────────────────────────────────────────────────

    /// Run one change through staging under a fresh run id.
    ///
    /// Writes `proposed`, then `tested` or `failed`. If `proposed` cannot be
    /// written nothing is staged. A landed change refreshes the registry
    /// entry before its `tested` event is written.
    pub async fn stage_change(
        &self,
        proposal: &ChangeProposal,
        ctx: &ExecutionContext,
    ) -> PipelineResult<StageReport> {
        let run_id = Uuid::new_v4().to_string();
        let hash = content_hash(&proposal.new_content);
        let branch = build_branch_name(ctx, &proposal.file_path, &hash);

        self.record(
            self.event(LifecycleEventType::Proposed, &run_id, ctx)
                .payload(json!({
                    "filePath": proposal.file_path.to_string_lossy(),
                    "contentHash": hash,
                    "branch": branch.as_str(),
                    "testInput": proposal.test_input,
                })),
        )
        .await?;
        info!(run_id = %run_id, tool = %proposal.tool_name, branch = %branch, "Change proposed");

        let outcome = self.deployer.stage(proposal, ctx).await;

        let append = if outcome.success {
            let mut entry = ToolEntry::new(&proposal.tool_name, &proposal.file_path, &hash);
            if let Some(commit) = &outcome.commit {
                entry = entry.with_commit(commit);
            }
            self.registry.write().await.replace(entry);

            self.event(LifecycleEventType::Tested, &run_id, ctx)
                .stage("test")
                .payload(json!({
                    "branch": outcome.branch,
                    "originalBranch": outcome.original_branch,
                    "commit": outcome.commit,
                    "contentHash": hash,
                    "warnings": outcome.warnings,
                    "output": outcome.sandbox.as_ref().and_then(|s| s.output.clone()),
                }))
        } else {
            let stage = outcome
                .failure
                .map(|f| f.ledger_stage())
                .unwrap_or("git");
            warn!(
                run_id = %run_id,
                tool = %proposal.tool_name,
                stage,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Change failed staging"
            );
            self.event(LifecycleEventType::Failed, &run_id, ctx)
                .stage(stage)
                .payload(json!({
                    "branch": outcome.branch,
                    "failure": outcome.failure,
                    "error": outcome.error,
                }))
        };
        self.record(append).await?;

        Ok(StageReport { run_id, outcome })
    }

    // ── Promotion ──────────────────────────────────────────────────────

    /// Decide promotion for a tested run with the configured contexts.
    pub async fn promote(
        &self,
        run_id: &str,
        statuses: &[StatusContext],
    ) -> PipelineResult<PromotionReport> {
        self.promote_with(run_id, statuses, self.required_contexts.as_deref())
            .await
    }

    /// Decide promotion for a tested run and record `promoted` or
    /// `promotion_blocked`.
    ///
    /// A run without a `tested` event, or one already promoted, is refused
    /// without touching the ledger.
    pub async fn promote_with(
        &self,
        run_id: &str,
        statuses: &[StatusContext],
        required: Option<&[String]>,
    ) -> PipelineResult<PromotionReport> {
        let events = self.ledger.list_run(run_id).await?;
        let not_promotable = |reason: &str| PipelineError::NotPromotable {
            run_id: run_id.to_string(),
            reason: reason.to_string(),
        };
        if events.is_empty() {
            return Err(not_promotable("unknown run"));
        }
        if events
            .iter()
            .any(|e| e.event_type == LifecycleEventType::Promoted)
        {
            return Err(not_promotable("already promoted"));
        }
        let tested = events
            .iter()
            .rev()
            .find(|e| e.event_type == LifecycleEventType::Tested)
            .ok_or_else(|| not_promotable("run has not passed its sandbox test"))?;

        let gate = evaluate(statuses, required);
        let control = self.control.get().await?;
        let decision = decide(&control, &gate);

        let mut append = LifecycleAppend::new(decision.event_type())
            .run(run_id)
            .stage("promotion")
            .actor(&self.actor)
            .payload(json!({
                "decision": decision,
                "gate": gate,
                "commit": tested.payload.get("commit"),
            }));
        append.tool_name = tested.tool_name.clone();
        append.tool_call_id = tested.tool_call_id.clone();
        self.record(append).await?;

        if decision.is_promote() {
            info!(run_id, "Change promoted");
        } else {
            warn!(run_id, reasons = ?decision.reasons(), "Promotion blocked");
        }

        Ok(PromotionReport {
            run_id: run_id.to_string(),
            gate,
            control,
            decision,
        })
    }

    pub async fn control_state(&self) -> PipelineResult<PromotionControlState> {
        Ok(self.control.get().await?)
    }

    /// Pause all promotions. The reason is mandatory.
    pub async fn pause(
        &self,
        reason: &str,
        updated_by: Option<&str>,
    ) -> PipelineResult<PromotionControlState> {
        Ok(self.control.pause(reason, updated_by).await?)
    }

    pub async fn resume(&self, updated_by: Option<&str>) -> PipelineResult<PromotionControlState> {
        Ok(self.control.resume(updated_by).await?)
    }

    // ── Health and rollback ────────────────────────────────────────────

    pub async fn record_health_window(
        &self,
        verdict: &HealthVerdict,
    ) -> PipelineResult<HealthOutcome> {
        Ok(self.rollback.record_health_window(verdict).await?)
    }

    pub fn rollback(&self) -> &RollbackCoordinator {
        &self.rollback
    }

    // ── Operator view ──────────────────────────────────────────────────

    /// Pause state, the latest event of each run, and rollback progress.
    pub async fn status(&self, window: QueryWindow) -> PipelineResult<OperatorStatus> {
        let control = self.control.get().await?;
        let runs = self.ledger.latest_per_run(window).await?;
        let rollback_in_progress = self.rollback.rollback_in_progress() || rollback_pending(&runs);
        Ok(OperatorStatus {
            control,
            runs,
            rollback_in_progress,
            baseline: self.rollback.baseline().await,
        })
    }

    pub async fn run_events(&self, run_id: &str) -> PipelineResult<Vec<LifecycleEvent>> {
        Ok(self.ledger.list_run(run_id).await?)
    }

    pub async fn recent_events(&self, window: QueryWindow) -> PipelineResult<Vec<LifecycleEvent>> {
        Ok(self.ledger.list_recent(window).await?)
    }

    pub fn registry(&self) -> &RwLock<ToolRegistry> {
        &self.registry
    }

    pub fn deployer(&self) -> &StagingDeployer {
        &self.deployer
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn event(
        &self,
        event_type: LifecycleEventType,
        run_id: &str,
        ctx: &ExecutionContext,
    ) -> LifecycleAppend {
        let append = LifecycleAppend::new(event_type).run(run_id).context(ctx);
        if append.actor_source.is_some() {
            append
        } else {
            append.actor(&self.actor)
        }
    }

    async fn record(&self, append: LifecycleAppend) -> PipelineResult<LifecycleReceipt> {
        let run_id = append.run_id.clone().unwrap_or_default();
        let event_type = append.event_type;
        self.ledger.append(append).await.map_err(|source| {
            error!(run_id = %run_id, event_type = %event_type, error = %source, "Failed to record lifecycle event");
            PipelineError::LedgerWrite {
                run_id,
                event_type,
                source,
            }
        })
    }
}
