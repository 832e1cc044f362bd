//! Thin async wrapper over the `git` CLI.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{StagingError, StagingResult};

/// One `git status --porcelain` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    /// Two-letter `XY` code.
    pub code: String,
    pub path: String,
    /// Source path of a rename or copy.
    pub original: Option<String>,
}

/// A local working repository driven through the `git` executable.
///
/// Clones share one working-tree lock; see [`lock_worktree`](Self::lock_worktree).
#[derive(Clone, Debug)]
pub struct GitRepository {
    workdir: PathBuf,
    program: String,
    author: Option<(String, String)>,
    worktree: Arc<Mutex<()>>,
}

impl GitRepository {
    pub fn open(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            program: "git".to_string(),
            author: None,
            worktree: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Commit identity used instead of the repository's configuration.
    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author = Some((name.into(), email.into()));
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Exclusive use of the working tree for a multi-step operation.
    ///
    /// Every component that switches branches or commits holds this guard
    /// for the whole sequence.
    pub async fn lock_worktree(&self) -> MutexGuard<'_, ()> {
        self.worktree.lock().await
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Current branch name; [`StagingError::DetachedHead`] when not on one.
    pub async fn current_branch(&self) -> StagingResult<String> {
        let out = self.output(&["symbolic-ref", "--short", "-q", "HEAD"]).await?;
        match out.status.code() {
            Some(0) => Ok(stdout_text(&out)),
            Some(1) => Err(StagingError::DetachedHead),
            _ => Err(git_error(&["symbolic-ref"], &out)),
        }
    }

    /// Uncommitted changes touching `path`, untracked files included.
    pub async fn path_status(&self, path: &Path) -> StagingResult<Vec<StatusEntry>> {
        let path = path.to_string_lossy();
        let raw = self
            .run(&[
                "status",
                "--porcelain=v1",
                "-z",
                "--untracked-files=all",
                "--",
                &path,
            ])
            .await?;
        Ok(parse_status(&raw))
    }

    pub async fn branch_exists(&self, branch: &str) -> StagingResult<bool> {
        let reference = format!("refs/heads/{branch}");
        let out = self
            .output(&["show-ref", "--verify", "--quiet", &reference])
            .await?;
        Ok(out.status.success())
    }

    pub async fn head_commit(&self) -> StagingResult<String> {
        self.rev_parse("HEAD").await
    }

    pub async fn rev_parse(&self, rev: &str) -> StagingResult<String> {
        let spec = format!("{rev}^{{commit}}");
        self.run(&["rev-parse", "--verify", "-q", &spec]).await
    }

    /// Whether the index entry for `path` differs from `HEAD`.
    pub async fn has_staged_changes(&self, path: &Path) -> StagingResult<bool> {
        let path = path.to_string_lossy();
        let out = self
            .output(&["diff", "--cached", "--quiet", "--", &path])
            .await?;
        match out.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(git_error(&["diff", "--cached"], &out)),
        }
    }

    /// Whether `path` exists in the tree of `HEAD`.
    pub async fn tracked_at_head(&self, path: &Path) -> StagingResult<bool> {
        let object = format!("HEAD:{}", path.to_string_lossy());
        let out = self.output(&["cat-file", "-e", &object]).await?;
        Ok(out.status.success())
    }

    /// Full message of a commit.
    pub async fn commit_message(&self, rev: &str) -> StagingResult<String> {
        self.run(&["log", "-1", "--format=%B", rev]).await
    }

    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> StagingResult<bool> {
        let out = self
            .output(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(git_error(&["merge-base"], &out)),
        }
    }

    // ── Mutations ─────────────────────────────────────────────────────

    /// Create `branch` at `HEAD` and switch to it.
    pub async fn create_branch(&self, branch: &str) -> StagingResult<()> {
        self.run(&["checkout", "-q", "-b", branch]).await.map(drop)
    }

    pub async fn checkout(&self, branch: &str) -> StagingResult<()> {
        self.run(&["checkout", "-q", branch]).await.map(drop)
    }

    pub async fn add(&self, path: &Path) -> StagingResult<()> {
        let path = path.to_string_lossy();
        self.run(&["add", "--", &path]).await.map(drop)
    }

    /// Commit `path` only, returning the new commit id.
    pub async fn commit_path(&self, message: &str, path: &Path) -> StagingResult<String> {
        let path = path.to_string_lossy();
        self.run(&["commit", "-q", "-m", message, "--", &path])
            .await?;
        self.head_commit().await
    }

    /// Return `path` in the index and working tree to its `HEAD` state,
    /// removing it when `HEAD` does not track it.
    pub async fn discard_path(&self, path: &Path) -> StagingResult<()> {
        let tracked = self.tracked_at_head(path).await?;
        let path = path.to_string_lossy();
        if tracked {
            self.run(&["checkout", "-q", "HEAD", "--", &path])
                .await
                .map(drop)
        } else {
            self.run(&["rm", "-q", "--cached", "--ignore-unmatch", "--", &path])
                .await?;
            self.run(&["clean", "-q", "-f", "--", &path]).await.map(drop)
        }
    }

    pub async fn merge_ff_only(&self, branch: &str) -> StagingResult<()> {
        self.run(&["merge", "-q", "--ff-only", branch]).await.map(drop)
    }

    pub async fn delete_branch(&self, branch: &str, force: bool) -> StagingResult<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", "-q", flag, branch]).await.map(drop)
    }

    /// Revert every commit in `base..HEAD`, newest first, as new commits.
    pub async fn revert_to(&self, base: &str) -> StagingResult<String> {
        let range = format!("{base}..HEAD");
        if let Err(e) = self.run(&["revert", "--no-edit", &range]).await {
            let _ = self.run(&["revert", "--abort"]).await;
            return Err(e);
        }
        self.head_commit().await
    }

    // ── Plumbing ──────────────────────────────────────────────────────

    async fn output(&self, args: &[&str]) -> StagingResult<Output> {
        let mut command = Command::new(&self.program);
        if let Some((name, email)) = &self.author {
            command
                .arg("-c")
                .arg(format!("user.name={name}"))
                .arg("-c")
                .arg(format!("user.email={email}"));
        }
        command
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());

        debug!(args = ?args, "git");
        command.output().await.map_err(StagingError::Spawn)
    }

    async fn run(&self, args: &[&str]) -> StagingResult<String> {
        let out = self.output(args).await?;
        if out.status.success() {
            Ok(stdout_text(&out))
        } else {
            Err(git_error(args, &out))
        }
    }
}

fn stdout_text(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).trim_end().to_string()
}

fn git_error(args: &[&str], out: &Output) -> StagingError {
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        out.status.to_string()
    } else {
        stderr
    };
    StagingError::Git {
        command: args.first().copied().unwrap_or_default().to_string(),
        message,
    }
}

/// Parse `git status --porcelain=v1 -z` output.
pub fn parse_status(raw: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());
    while let Some(field) = fields.next() {
        if field.len() < 4 {
            continue;
        }
        let (code, path) = (&field[..2], &field[3..]);
        let original = if code.contains('R') || code.contains('C') {
            fields.next().map(String::from)
        } else {
            None
        };
        entries.push(StatusEntry {
            code: code.to_string(),
            path: path.to_string(),
            original,
        });
    }
    entries
}
