//! Command implementations. Results are printed to stdout as JSON; logs go
//! to stderr.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{ArgGroup, Args};
use selfext_promotion::evaluate;
use selfext_provenance::{build_branch_name, build_commit_metadata, content_hash};
use selfext_rollback::HealthVerdict;
use selfext_storage::{verify_chain, QueryWindow};
use selfext_types::{ChangeProposal, ContextId, ExecutionContext, StatusContext};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::SelfExtConfig;
use crate::setup;

// ── Arguments ──────────────────────────────────────────────────────────

/// Provenance identifiers of the change
#[derive(Args, Debug)]
pub struct ContextArgs {
    #[arg(long)]
    goal: Option<String>,

    #[arg(long)]
    cycle: Option<String>,

    #[arg(long)]
    sub_goal: Option<String>,

    #[arg(long)]
    tool_call: Option<String>,

    /// Who proposed the change
    #[arg(long)]
    actor: Option<String>,
}

/// The candidate change
#[derive(Args, Debug)]
pub struct ChangeArgs {
    /// Tool being modified
    #[arg(long)]
    tool: String,

    /// Repository-relative path of the tool source
    #[arg(long)]
    file: PathBuf,

    /// New source, inline
    #[arg(long, conflicts_with = "content_file", required_unless_present = "content_file")]
    content: Option<String>,

    /// New source, read from a file
    #[arg(long)]
    content_file: Option<PathBuf>,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Args, Debug)]
pub struct StageArgs {
    #[command(flatten)]
    change: ChangeArgs,

    /// JSON test input passed to the tool's `execute`
    #[arg(long, default_value = "null")]
    input: String,
}

#[derive(Args, Debug)]
pub struct BranchNameArgs {
    #[command(flatten)]
    change: ChangeArgs,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("verdict").required(true).args(["passed", "failed"])))]
pub struct HealthArgs {
    /// Run that promoted the observed change
    #[arg(long)]
    run: String,

    #[arg(long)]
    commit: String,

    #[arg(long, default_value = "main")]
    branch: String,

    /// The change survived its observation window
    #[arg(long)]
    passed: bool,

    /// The change failed its observation window
    #[arg(long)]
    failed: bool,

    #[arg(long)]
    detail: Option<String>,
}

// ── Commands ───────────────────────────────────────────────────────────

pub async fn stage(config: &SelfExtConfig, args: StageArgs) -> anyhow::Result<()> {
    let input: Value = serde_json::from_str(&args.input).context("--input is not valid JSON")?;
    let (ctx, content) = args.change.resolve()?;
    let proposal = ChangeProposal::new(&args.change.tool, &args.change.file, content, input);

    let pipeline = setup::pipeline(config).await?;
    let report = pipeline.stage_change(&proposal, &ctx).await?;
    print_json(&report)?;

    if !report.outcome.success {
        bail!(
            "staging failed: {}",
            report.outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub fn gate(config: &SelfExtConfig, statuses: &[String], required: Vec<String>) -> anyhow::Result<()> {
    let statuses = parse_statuses(statuses)?;
    let required = required_contexts(config, required);
    print_json(&evaluate(&statuses, required.as_deref()))
}

pub async fn promote(
    config: &SelfExtConfig,
    run_id: &str,
    statuses: &[String],
    required: Vec<String>,
) -> anyhow::Result<()> {
    let statuses = parse_statuses(statuses)?;
    let required = required_contexts(config, required);
    let pipeline = setup::pipeline(config).await?;
    let report = pipeline
        .promote_with(run_id, &statuses, required.as_deref())
        .await?;
    print_json(&report)
}

pub async fn pause(config: &SelfExtConfig, reason: &str, by: Option<&str>) -> anyhow::Result<()> {
    let pipeline = setup::pipeline(config).await?;
    print_json(&pipeline.pause(reason, by).await?)
}

pub async fn resume(config: &SelfExtConfig, by: Option<&str>) -> anyhow::Result<()> {
    let pipeline = setup::pipeline(config).await?;
    print_json(&pipeline.resume(by).await?)
}

pub async fn status(config: &SelfExtConfig, limit: usize) -> anyhow::Result<()> {
    let pipeline = setup::pipeline(config).await?;
    print_json(&pipeline.status(QueryWindow::latest(limit)).await?)
}

pub async fn ledger(
    config: &SelfExtConfig,
    run: Option<&str>,
    limit: usize,
    verify: bool,
) -> anyhow::Result<()> {
    let pipeline = setup::pipeline(config).await?;
    let events = match run {
        Some(run_id) => pipeline.run_events(run_id).await?,
        None => pipeline.recent_events(QueryWindow::latest(limit)).await?,
    };
    if verify {
        verify_chain(&events).context("ledger hash chain verification failed")?;
        return print_json(&json!({ "events": events, "chainVerified": true }));
    }
    print_json(&events)
}

pub async fn health(config: &SelfExtConfig, args: HealthArgs) -> anyhow::Result<()> {
    let verdict = if args.passed {
        let mut verdict = HealthVerdict::passed(args.run, args.commit, args.branch);
        verdict.detail = args.detail;
        verdict
    } else {
        let detail = args
            .detail
            .unwrap_or_else(|| "health window failed".to_string());
        HealthVerdict::failed(args.run, args.commit, args.branch, detail)
    };
    let pipeline = setup::pipeline(config).await?;
    print_json(&pipeline.record_health_window(&verdict).await?)
}

pub fn branch_name(args: BranchNameArgs) -> anyhow::Result<()> {
    let (ctx, content) = args.change.resolve()?;
    let hash = content_hash(&content);
    let branch = build_branch_name(&ctx, &args.change.file, &hash);
    print_json(&json!({
        "branch": branch.as_str(),
        "contentHash": hash,
        "metadata": build_commit_metadata(&ctx).payload,
    }))
}

// ── Helpers ────────────────────────────────────────────────────────────

impl ChangeArgs {
    /// Execution context and the candidate source.
    fn resolve(&self) -> anyhow::Result<(ExecutionContext, String)> {
        let content = match (&self.content, &self.content_file) {
            (Some(content), _) => content.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            (None, None) => bail!("either --content or --content-file is required"),
        };

        let ids = &self.context;
        let mut ctx = ExecutionContext::new(&self.tool);
        ctx.goal_id = ids.goal.as_deref().map(context_id);
        ctx.cycle_id = ids.cycle.as_deref().map(context_id);
        ctx.sub_goal_id = ids.sub_goal.as_deref().map(context_id);
        ctx.tool_call_id = ids.tool_call.clone();
        ctx.actor_source = ids.actor.clone();
        Ok((ctx, content))
    }
}

/// Numeric identifiers stay numeric in the commit metadata.
fn context_id(raw: &str) -> ContextId {
    match raw.trim().parse::<i64>() {
        Ok(n) => ContextId::Number(n),
        Err(_) => ContextId::Text(raw.to_string()),
    }
}

fn parse_statuses(raw: &[String]) -> anyhow::Result<Vec<StatusContext>> {
    raw.iter()
        .map(|s| {
            s.split_once('=')
                .map(|(context, state)| StatusContext::new(context, state))
                .ok_or_else(|| anyhow!("invalid status '{s}', expected CONTEXT=STATE"))
        })
        .collect()
}

fn required_contexts(config: &SelfExtConfig, cli: Vec<String>) -> Option<Vec<String>> {
    if cli.is_empty() {
        config.promotion.required_contexts.clone()
    } else {
        Some(cli)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_context_and_state() {
        let parsed = parse_statuses(&["ci/build=success".into(), "ci/test=".into()]).unwrap();
        assert_eq!(parsed[0], StatusContext::new("ci/build", "success"));
        assert_eq!(parsed[1].state, "");
        assert!(parse_statuses(&["ci/build".into()]).is_err());
    }

    #[test]
    fn numeric_ids_stay_numeric() {
        assert_eq!(context_id("42"), ContextId::Number(42));
        assert_eq!(context_id("c-1"), ContextId::Text("c-1".into()));
    }

    #[test]
    fn cli_required_contexts_override_config() {
        let mut config = SelfExtConfig::default();
        config.promotion.required_contexts = Some(vec!["ci/lint".into()]);
        assert_eq!(
            required_contexts(&config, vec![]),
            Some(vec!["ci/lint".to_string()])
        );
        assert_eq!(
            required_contexts(&config, vec!["ci/build".into()]),
            Some(vec!["ci/build".to_string()])
        );
    }
}
