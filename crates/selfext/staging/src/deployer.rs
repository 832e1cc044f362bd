//! The staging state machine.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use selfext_compiler::Compiler;
use selfext_provenance::{build_branch_name, build_commit_metadata, commit_message, content_hash};
use selfext_sandbox::{Sandbox, DEFAULT_TIMEOUT_MS};
use selfext_types::{ChangeProposal, ExecutionContext};
use tracing::{info, warn};

use crate::error::{StagingError, StagingResult};
use crate::git::GitRepository;
use crate::outcome::{StageFailure, StageOutcome};

/// Stages candidate changes in one repository.
///
/// Calls to [`stage`](Self::stage) hold the repository's working-tree lock:
/// a checkout switches the whole tree, so a stage cannot interleave with
/// another stage or a restore on the same [`GitRepository`] clone family.
/// Across processes the fast-forward-only merge rejects the loser.
pub struct StagingDeployer {
    repo: GitRepository,
    compiler: Arc<dyn Compiler>,
    sandbox: Arc<dyn Sandbox>,
    sandbox_timeout: Duration,
}

impl StagingDeployer {
    pub fn new(repo: GitRepository, compiler: Arc<dyn Compiler>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            repo,
            compiler,
            sandbox,
            sandbox_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }

    /// Stage, verify, and land one change.
    ///
    /// On return the repository is on the branch it started on and the
    /// staging branch no longer exists.
    pub async fn stage(&self, proposal: &ChangeProposal, ctx: &ExecutionContext) -> StageOutcome {
        let _guard = self.repo.lock_worktree().await;

        let hash = content_hash(&proposal.new_content);
        let branch = build_branch_name(ctx, &proposal.file_path, &hash).into_string();
        let outcome = StageOutcome::new(&branch);

        let original = match self.repo.current_branch().await {
            Ok(original) => original,
            Err(e) => {
                warn!(tool = %proposal.tool_name, error = %e, "Cannot determine original branch");
                return outcome.fail(StageFailure::from(&e), e.to_string());
            }
        };
        info!(
            tool = %proposal.tool_name,
            branch = %branch,
            original = %original,
            "Staging candidate change"
        );

        let outcome = StageOutcome {
            original_branch: Some(original.clone()),
            ..outcome
        };

        match self.try_stage(proposal, ctx, &branch, &original, outcome.clone()).await {
            Ok(outcome) => {
                if outcome.success {
                    info!(tool = %proposal.tool_name, branch = %branch, "Candidate merged");
                } else {
                    warn!(
                        tool = %proposal.tool_name,
                        branch = %branch,
                        failure = ?outcome.failure,
                        error = outcome.error.as_deref().unwrap_or_default(),
                        "Candidate rejected"
                    );
                }
                outcome
            }
            Err(e) => {
                warn!(tool = %proposal.tool_name, branch = %branch, error = %e, "Staging aborted");
                self.cleanup(&original, &branch).await;
                outcome.fail(StageFailure::from(&e), e.to_string())
            }
        }
    }

    async fn try_stage(
        &self,
        proposal: &ChangeProposal,
        ctx: &ExecutionContext,
        branch: &str,
        original: &str,
        mut outcome: StageOutcome,
    ) -> StagingResult<StageOutcome> {
        let path = self.relative_path(&proposal.file_path)?;

        if !self.repo.path_status(&path).await?.is_empty() {
            return Ok(outcome.fail(
                StageFailure::DirtyWorkingTree,
                format!(
                    "Working tree has uncommitted changes for {}",
                    proposal.file_path.display()
                ),
            ));
        }

        if self.repo.branch_exists(branch).await? {
            warn!(branch = %branch, "Removing stale staging branch");
            self.repo.delete_branch(branch, true).await?;
        }
        self.repo.create_branch(branch).await?;

        let commit = match self.commit_candidate(&path, proposal, ctx).await {
            Ok(Some(commit)) => commit,
            Ok(None) => {
                self.discard_candidate(&path).await;
                self.cleanup(original, branch).await;
                return Ok(outcome.fail(
                    StageFailure::NoChange,
                    format!("No changes to stage for {}", proposal.file_path.display()),
                ));
            }
            Err(e) => {
                self.discard_candidate(&path).await;
                return Err(e);
            }
        };
        outcome.commit = Some(commit);

        let module = match self.compiler.compile(&proposal.new_content).await {
            Ok(module) => module,
            Err(e) => {
                self.cleanup(original, branch).await;
                return Ok(outcome.fail(StageFailure::Compilation, e.to_string()));
            }
        };
        outcome.warnings = module.warnings.clone();

        let result = self
            .sandbox
            .run(
                &module.code,
                &proposal.tool_name,
                &proposal.test_input,
                self.sandbox_timeout,
            )
            .await;
        outcome.sandbox = Some(result.clone());
        if !result.passed {
            self.cleanup(original, branch).await;
            return Ok(outcome.fail(StageFailure::Sandbox, result.error_message()));
        }

        self.repo.checkout(original).await?;
        if let Err(e) = self.repo.merge_ff_only(branch).await {
            self.cleanup(original, branch).await;
            return Ok(outcome.fail(
                StageFailure::MergeRejected,
                format!("Fast-forward merge of {branch} into {original} rejected: {e}"),
            ));
        }
        if let Err(e) = self.repo.delete_branch(branch, true).await {
            // The change already landed; report success and leave a trace.
            warn!(branch = %branch, error = %e, "Failed to delete merged staging branch");
        }

        Ok(outcome.succeed())
    }

    /// Write, add, and commit the candidate. `None` when it matches `HEAD`.
    async fn commit_candidate(
        &self,
        path: &Path,
        proposal: &ChangeProposal,
        ctx: &ExecutionContext,
    ) -> StagingResult<Option<String>> {
        self.write_candidate(path, &proposal.new_content).await?;
        self.repo.add(path).await?;
        if !self.repo.has_staged_changes(path).await? {
            return Ok(None);
        }
        let metadata = build_commit_metadata(ctx);
        self.repo
            .commit_path(&commit_message(ctx, &metadata), path)
            .await
            .map(Some)
    }

    /// Drop an uncommitted candidate so the checkout back to the original
    /// branch does not carry it along.
    async fn discard_candidate(&self, path: &Path) {
        if let Err(e) = self.repo.discard_path(path).await {
            warn!(path = %path.display(), error = %e, "Failed to discard uncommitted candidate");
        }
    }

    /// Best-effort return to `original` and removal of `branch`.
    async fn cleanup(&self, original: &str, branch: &str) {
        if let Err(e) = self.repo.checkout(original).await {
            warn!(original = %original, error = %e, "Cleanup checkout failed");
        }
        match self.repo.branch_exists(branch).await {
            Ok(true) => {
                if let Err(e) = self.repo.delete_branch(branch, true).await {
                    warn!(branch = %branch, error = %e, "Cleanup branch delete failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(branch = %branch, error = %e, "Cleanup branch lookup failed"),
        }
    }

    async fn write_candidate(&self, path: &Path, content: &str) -> StagingResult<()> {
        let full = self.repo.workdir().join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StagingError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|source| StagingError::Io { path: full, source })
    }

    /// Repository-relative form of `file_path`, rejecting escapes.
    fn relative_path(&self, file_path: &Path) -> StagingResult<PathBuf> {
        let relative = if file_path.is_absolute() {
            file_path
                .strip_prefix(self.repo.workdir())
                .map_err(|_| StagingError::InvalidPath(file_path.to_path_buf()))?
        } else {
            file_path
        };
        let valid = relative.components().next().is_some()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(StagingError::InvalidPath(file_path.to_path_buf()));
        }
        Ok(relative.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use selfext_compiler::{CommandCompiler, PassthroughCompiler, SimulatedCompiler};
    use selfext_provenance::parse_commit_metadata;
    use selfext_sandbox::{ProcessSandbox, SandboxConfig, SimulatedSandbox};
    use selfext_types::SandboxResult;
    use serde_json::{json, Value};
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            out.status.success(),
            "git {:?}: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    fn scratch_repo() -> (TempDir, GitRepository) {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(dir.path(), &["config", "user.name", "Test"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        git(dir.path(), &["config", "commit.gpgsign", "false"]);
        std::fs::write(dir.path().join("README.md"), "tools\n").unwrap();
        git(dir.path(), &["add", "README.md"]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);
        let repo = GitRepository::open(dir.path()).with_author("Agent", "agent@example.com");
        (dir, repo)
    }

    fn deployer(repo: GitRepository, sandbox: Arc<dyn Sandbox>) -> StagingDeployer {
        StagingDeployer::new(repo, Arc::new(PassthroughCompiler), sandbox)
    }

    fn proposal(content: &str) -> ChangeProposal {
        ChangeProposal::new("weather", "tools/weather.sh", content, json!({"city": "Oslo"}))
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("weather")
            .with_goal(1)
            .with_cycle(2)
            .with_sub_goal(3)
    }

    async fn assert_clean_exit(repo: &GitRepository, outcome: &StageOutcome) {
        assert_eq!(repo.current_branch().await.unwrap(), "main");
        assert!(!repo.branch_exists(&outcome.branch).await.unwrap());
    }

    #[tokio::test]
    async fn passing_change_lands_on_original_branch() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        let sandbox = Arc::new(SimulatedSandbox::passing_with(json!("sunny")));
        let deployer = deployer(repo.clone(), sandbox.clone());

        let outcome = deployer
            .stage(&proposal("execute() { echo sunny; }\n"), &ctx())
            .await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_clean_exit(&repo, &outcome).await;
        assert_eq!(outcome.original_branch.as_deref(), Some("main"));
        assert_eq!(repo.head_commit().await.unwrap(), outcome.commit.clone().unwrap());
        assert!(outcome
            .branch
            .starts_with("jarvis/self-extension/weather/g1-c2-s3-"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tools/weather.sh")).unwrap(),
            "execute() { echo sunny; }\n"
        );

        let message = repo.commit_message("HEAD").await.unwrap();
        assert!(message.starts_with("self-extension: update tool weather"));
        let metadata = parse_commit_metadata(&message).unwrap();
        assert_eq!(metadata.payload["goalId"], 1);
        assert_eq!(metadata.payload["toolName"], "weather");

        let runs = sandbox.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].input, json!({"city": "Oslo"}));
    }

    #[tokio::test]
    async fn sandbox_failure_abandons_branch() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        let before = repo.head_commit().await.unwrap();
        let deployer = deployer(repo.clone(), Arc::new(SimulatedSandbox::failing("city not found")));

        let outcome = deployer.stage(&proposal("execute() { :; }\n"), &ctx()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(StageFailure::Sandbox));
        assert_eq!(outcome.error.as_deref(), Some("city not found"));
        assert_clean_exit(&repo, &outcome).await;
        assert_eq!(repo.head_commit().await.unwrap(), before);
        assert!(!dir.path().join("tools/weather.sh").exists());
    }

    #[tokio::test]
    async fn compile_failure_skips_sandbox() {
        if !git_available() {
            return;
        }
        let (_dir, repo) = scratch_repo();
        let sandbox = Arc::new(SimulatedSandbox::passing());
        let deployer = StagingDeployer::new(
            repo.clone(),
            Arc::new(SimulatedCompiler::rejecting(vec![
                "1:1 unexpected token".into(),
                "3:7 missing brace".into(),
            ])),
            sandbox.clone(),
        );

        let outcome = deployer.stage(&proposal("broken"), &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::Compilation));
        assert_eq!(
            outcome.error.as_deref(),
            Some("1:1 unexpected token\n3:7 missing brace")
        );
        assert!(sandbox.runs().is_empty());
        assert_clean_exit(&repo, &outcome).await;
    }

    #[tokio::test]
    async fn dirty_file_is_refused_before_branching() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        std::fs::write(dir.path().join("tools/weather.sh"), "wip\n").unwrap();
        let sandbox = Arc::new(SimulatedSandbox::passing());
        let deployer = deployer(repo.clone(), sandbox.clone());

        let outcome = deployer.stage(&proposal("execute() { :; }\n"), &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::DirtyWorkingTree));
        assert_eq!(
            outcome.error.as_deref(),
            Some("Working tree has uncommitted changes for tools/weather.sh")
        );
        assert!(sandbox.runs().is_empty());
        assert_clean_exit(&repo, &outcome).await;
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tools/weather.sh")).unwrap(),
            "wip\n"
        );
    }

    #[tokio::test]
    async fn identical_content_is_no_change() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        std::fs::write(dir.path().join("tools/weather.sh"), "same\n").unwrap();
        git(dir.path(), &["add", "tools/weather.sh"]);
        git(dir.path(), &["commit", "-q", "-m", "add tool"]);
        let deployer = deployer(repo.clone(), Arc::new(SimulatedSandbox::passing()));

        let outcome = deployer.stage(&proposal("same\n"), &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::NoChange));
        assert_clean_exit(&repo, &outcome).await;
    }

    #[tokio::test]
    async fn identical_content_is_no_change_with_other_paths_staged() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        std::fs::write(dir.path().join("tools/weather.sh"), "same\n").unwrap();
        git(dir.path(), &["add", "tools/weather.sh"]);
        git(dir.path(), &["commit", "-q", "-m", "add tool"]);
        std::fs::write(dir.path().join("other.txt"), "unrelated\n").unwrap();
        git(dir.path(), &["add", "other.txt"]);
        let deployer = deployer(repo.clone(), Arc::new(SimulatedSandbox::passing()));

        let outcome = deployer.stage(&proposal("same\n"), &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::NoChange));
        assert_clean_exit(&repo, &outcome).await;
        assert_eq!(git(dir.path(), &["status", "--porcelain"]), "A  other.txt");
    }

    fn reject_commits(dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let hook = dir.join(".git/hooks/pre-commit");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn failed_commit_leaves_new_file_off_original_branch() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        reject_commits(dir.path());
        let before = repo.head_commit().await.unwrap();
        let sandbox = Arc::new(SimulatedSandbox::passing());
        let deployer = deployer(repo.clone(), sandbox.clone());

        let outcome = deployer.stage(&proposal("CANDIDATE\n"), &ctx()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(StageFailure::Git));
        assert!(sandbox.runs().is_empty());
        assert_clean_exit(&repo, &outcome).await;
        assert_eq!(repo.head_commit().await.unwrap(), before);
        assert_eq!(git(dir.path(), &["status", "--porcelain"]), "");
        assert!(!dir.path().join("tools/weather.sh").exists());
    }

    #[tokio::test]
    async fn failed_commit_restores_tracked_file() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        std::fs::write(dir.path().join("tools/weather.sh"), "old\n").unwrap();
        git(dir.path(), &["add", "tools/weather.sh"]);
        git(dir.path(), &["commit", "-q", "-m", "add tool"]);
        reject_commits(dir.path());
        let deployer = deployer(repo.clone(), Arc::new(SimulatedSandbox::passing()));

        let outcome = deployer.stage(&proposal("new\n"), &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::Git));
        assert_clean_exit(&repo, &outcome).await;
        assert_eq!(git(dir.path(), &["status", "--porcelain"]), "");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tools/weather.sh")).unwrap(),
            "old\n"
        );
    }

    #[tokio::test]
    async fn stage_waits_for_worktree_lock() {
        if !git_available() {
            return;
        }
        let (_dir, repo) = scratch_repo();
        let deployer = deployer(repo.clone(), Arc::new(SimulatedSandbox::passing()));
        let p = proposal("execute() { :; }\n");
        let c = ctx();

        let held = repo.lock_worktree().await;
        let blocked = tokio::time::timeout(Duration::from_millis(200), deployer.stage(&p, &c)).await;
        assert!(blocked.is_err());
        drop(held);

        let outcome = deployer.stage(&p, &c).await;
        assert!(outcome.success, "{:?}", outcome.error);
    }

    #[tokio::test]
    async fn stale_staging_branch_is_replaced() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        let content = "execute() { echo hi; }\n";
        let p = proposal(content);
        let stale = build_branch_name(&ctx(), &p.file_path, &content_hash(content));
        git(dir.path(), &["branch", stale.as_str()]);

        let deployer = deployer(repo.clone(), Arc::new(SimulatedSandbox::passing()));
        let outcome = deployer.stage(&p, &ctx()).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_clean_exit(&repo, &outcome).await;
    }

    #[tokio::test]
    async fn detached_head_is_refused() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        git(dir.path(), &["checkout", "-q", "--detach"]);
        let deployer = deployer(repo, Arc::new(SimulatedSandbox::passing()));

        let outcome = deployer.stage(&proposal("x\n"), &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::DetachedHead));
        assert!(outcome.original_branch.is_none());
    }

    #[tokio::test]
    async fn escaping_path_is_refused() {
        if !git_available() {
            return;
        }
        let (_dir, repo) = scratch_repo();
        let deployer = deployer(repo.clone(), Arc::new(SimulatedSandbox::passing()));
        let p = ChangeProposal::new("weather", "../outside.sh", "x", Value::Null);

        let outcome = deployer.stage(&p, &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::Io));
        assert_clean_exit(&repo, &outcome).await;
    }

    /// Moves `main` forward while the candidate is under test.
    struct DivergingSandbox {
        dir: PathBuf,
    }

    #[async_trait]
    impl Sandbox for DivergingSandbox {
        async fn run(&self, _: &str, _: &str, _: &Value, _: Duration) -> SandboxResult {
            let tree = git(&self.dir, &["rev-parse", "main^{tree}"]);
            let commit = git(&self.dir, &["commit-tree", &tree, "-p", "main", "-m", "concurrent"]);
            git(&self.dir, &["update-ref", "refs/heads/main", &commit]);
            SandboxResult::passed(None)
        }

        fn name(&self) -> &str {
            "diverging"
        }
    }

    #[tokio::test]
    async fn diverged_base_rejects_merge() {
        if !git_available() {
            return;
        }
        let (dir, repo) = scratch_repo();
        let deployer = deployer(
            repo.clone(),
            Arc::new(DivergingSandbox {
                dir: dir.path().to_path_buf(),
            }),
        );

        let outcome = deployer.stage(&proposal("execute() { :; }\n"), &ctx()).await;

        assert_eq!(outcome.failure, Some(StageFailure::MergeRejected));
        assert!(outcome.error.as_deref().unwrap().contains("rejected"));
        assert_clean_exit(&repo, &outcome).await;
        assert_eq!(repo.commit_message("HEAD").await.unwrap(), "concurrent");
    }

    #[tokio::test]
    async fn shell_candidate_end_to_end() {
        if !git_available() {
            return;
        }
        let (_dir, repo) = scratch_repo();
        let scratch = tempfile::tempdir().unwrap();
        let deployer = StagingDeployer::new(
            repo.clone(),
            Arc::new(CommandCompiler::shell_syntax()),
            Arc::new(ProcessSandbox::new(
                SandboxConfig::default().with_temp_dir(scratch.path()),
            )),
        )
        .with_sandbox_timeout(Duration::from_secs(10));

        let ok = deployer
            .stage(&proposal("execute() {\n  printf '{\"ok\":true}'\n}\n"), &ctx())
            .await;
        assert!(ok.success, "{:?}", ok.error);
        assert_eq!(ok.sandbox.unwrap().output, Some(json!({"ok": true})));

        let throwing = deployer
            .stage(
                &proposal("execute() {\n  echo 'unknown city'\n  return 1\n}\n"),
                &ctx(),
            )
            .await;
        assert!(!throwing.success);
        assert_eq!(throwing.error.as_deref(), Some("unknown city"));
        assert_clean_exit(&repo, &throwing).await;
    }
}
