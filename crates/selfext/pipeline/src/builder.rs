//! Builder for [`SelfExtensionPipeline`].

use std::sync::Arc;

use selfext_promotion::PromotionControl;
use selfext_rollback::{BaselineRestorer, GitBaselineRestorer, RollbackCoordinator};
use selfext_staging::StagingDeployer;
use selfext_storage::{LifecycleLedger, PromotionControlStore, SelfExtensionStorage, DEFAULT_ACTOR};
use tokio::sync::RwLock;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::SelfExtensionPipeline;
use crate::registry::ToolRegistry;

/// Assembles a pipeline from its collaborators.
///
/// A deployer and storage are required. Without an explicit restorer the
/// pipeline restores baselines by reverting history in the deployer's
/// repository.
#[derive(Default)]
pub struct SelfExtensionPipelineBuilder {
    deployer: Option<StagingDeployer>,
    ledger: Option<Arc<dyn LifecycleLedger>>,
    control_store: Option<Arc<dyn PromotionControlStore>>,
    restorer: Option<Arc<dyn BaselineRestorer>>,
    registry: ToolRegistry,
    required_contexts: Option<Vec<String>>,
    actor: Option<String>,
}

impl SelfExtensionPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployer(mut self, deployer: StagingDeployer) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Use one backend for both the ledger and the control key.
    pub fn with_storage<S>(mut self, storage: Arc<S>) -> Self
    where
        S: SelfExtensionStorage + 'static,
    {
        self.ledger = Some(storage.clone());
        self.control_store = Some(storage);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LifecycleLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_control_store(mut self, store: Arc<dyn PromotionControlStore>) -> Self {
        self.control_store = Some(store);
        self
    }

    /// Override the default git restorer. A git restorer must be built from a
    /// clone of the deployer's repository so both share its working-tree lock.
    pub fn with_restorer(mut self, restorer: Arc<dyn BaselineRestorer>) -> Self {
        self.restorer = Some(restorer);
        self
    }

    /// Seed the registry with the tools already deployed.
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Contexts the gate requires; `None` falls back to the gate defaults.
    pub fn with_required_contexts(mut self, contexts: Option<Vec<String>>) -> Self {
        self.required_contexts = contexts;
        self
    }

    /// Actor recorded on events the pipeline writes on its own behalf.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Build the pipeline, recovering the known-good baseline from the ledger.
    pub async fn build(self) -> PipelineResult<SelfExtensionPipeline> {
        let deployer = self
            .deployer
            .ok_or(PipelineError::MissingComponent("staging deployer"))?;
        let ledger = self.ledger.ok_or(PipelineError::MissingComponent("ledger"))?;
        let control_store = self
            .control_store
            .ok_or(PipelineError::MissingComponent("promotion control store"))?;
        let restorer = match self.restorer {
            Some(restorer) => restorer,
            None => Arc::new(GitBaselineRestorer::new(deployer.repository().clone())),
        };

        let rollback = RollbackCoordinator::recover(ledger.clone(), restorer).await?;
        let control = PromotionControl::new(control_store, ledger.clone());

        Ok(SelfExtensionPipeline {
            deployer,
            ledger,
            control,
            rollback,
            registry: RwLock::new(self.registry),
            required_contexts: self.required_contexts,
            actor: self.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_string()),
        })
    }
}
