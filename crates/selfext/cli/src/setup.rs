//! Assemble the pipeline from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use selfext_compiler::{CommandCompiler, Compiler, PassthroughCompiler};
use selfext_pipeline::{SelfExtensionPipeline, SelfExtensionPipelineBuilder};
use selfext_sandbox::{ProcessSandbox, SandboxConfig};
use selfext_staging::{GitRepository, StagingDeployer};
use selfext_storage::{InMemoryStore, SqliteStore};
use tracing::debug;

use crate::config::{CompilerKind, SelfExtConfig, StorageConfig};

pub fn repository(config: &SelfExtConfig) -> GitRepository {
    let repo = &config.repository;
    let git = GitRepository::open(&repo.path).with_program(&repo.git_program);
    match (&repo.author_name, &repo.author_email) {
        (Some(name), Some(email)) => git.with_author(name, email),
        _ => git,
    }
}

pub fn compiler(config: &SelfExtConfig) -> Arc<dyn Compiler> {
    let c = &config.compiler;
    match c.kind {
        CompilerKind::Passthrough => Arc::new(PassthroughCompiler),
        CompilerKind::Command => Arc::new(CommandCompiler::new(&c.program, c.args.clone(), c.output)),
    }
}

pub fn sandbox(config: &SelfExtConfig) -> ProcessSandbox {
    let s = &config.sandbox;
    let mut sandbox_config = SandboxConfig::new(s.runtime)
        .with_timeout(Duration::from_millis(s.timeout_ms));
    if let Some(program) = &s.program {
        sandbox_config = sandbox_config.with_program(program);
    }
    sandbox_config.max_output_bytes = s.max_output_bytes;
    sandbox_config.inherit_env = s.inherit_env;
    ProcessSandbox::new(sandbox_config)
}

pub async fn pipeline(config: &SelfExtConfig) -> anyhow::Result<SelfExtensionPipeline> {
    let deployer = StagingDeployer::new(
        repository(config),
        compiler(config),
        Arc::new(sandbox(config)),
    )
    .with_sandbox_timeout(Duration::from_millis(config.sandbox.timeout_ms));

    let builder = SelfExtensionPipelineBuilder::new()
        .with_deployer(deployer)
        .with_required_contexts(config.promotion.required_contexts.clone())
        .with_actor("operator");

    let builder = match &config.storage {
        StorageConfig::Memory => {
            debug!("Using in-memory ledger");
            builder.with_storage(Arc::new(InMemoryStore::new()))
        }
        StorageConfig::Sqlite {
            url,
            max_connections,
        } => {
            debug!(url = %url, "Using SQLite ledger");
            let store = SqliteStore::connect_with_options(url, *max_connections)
                .await
                .with_context(|| format!("failed to open ledger at {url}"))?;
            builder.with_storage(Arc::new(store))
        }
    };

    Ok(builder.build().await?)
}
