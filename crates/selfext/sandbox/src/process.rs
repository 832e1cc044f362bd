//! OS-process sandbox.

use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use selfext_provenance::slugify;
use selfext_types::SandboxResult;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::{SandboxConfig, SandboxRuntime};
use crate::error::SandboxError;
use crate::harness::{self, INPUT_ENV};
use crate::sandbox::Sandbox;
use crate::settle::Settlement;

/// How long to wait for trailing stderr after the child exits.
const STDERR_GRACE: Duration = Duration::from_millis(250);

/// Fallback `PATH` when the parent has none.
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Sandbox that runs each candidate in a fresh child process.
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run with the configured default timeout.
    pub async fn run_default(&self, code: &str, tool_name: &str, input: &Value) -> SandboxResult {
        self.run(code, tool_name, input, self.config.default_timeout)
            .await
    }

    async fn execute(
        &self,
        code: &str,
        tool_name: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<SandboxResult, SandboxError> {
        // Dropped at the end of this function on every path.
        let scratch = Scratch::create(&self.config, tool_name, code)?;

        let mut child = self.command(&scratch, input).spawn().map_err(|source| {
            SandboxError::Spawn {
                program: self.config.program().to_string(),
                source,
            }
        })?;
        let pid = child.id();

        let stderr_tail = Arc::new(Mutex::new(Tail::new(self.config.max_output_bytes)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = stderr_tail.clone();
            tokio::spawn(collect_stderr(stderr, tail))
        });
        let stderr_abort = stderr_task.as_ref().map(|t| t.abort_handle());
        let stdout = child.stdout.take();

        let (settlement, outcome) = Settlement::new();

        let worker = tokio::spawn({
            let settlement = settlement.clone();
            let runtime = self.config.runtime;
            async move {
                let result = watch_child(child, stdout, stderr_task, stderr_tail, runtime).await;
                settlement.settle(result);
            }
        });

        let timer = tokio::spawn({
            let settlement = settlement.clone();
            async move {
                tokio::time::sleep(timeout).await;
                if settlement.settle(SandboxResult::failed(format!(
                    "Sandbox timeout after {}ms",
                    timeout.as_millis()
                ))) {
                    debug!("Sandbox timer settled first");
                }
            }
        });

        let result = outcome
            .await
            .unwrap_or_else(|_| SandboxResult::failed("sandbox settled without a result"));

        worker.abort();
        timer.abort();
        if let Some(handle) = stderr_abort {
            handle.abort();
        }
        if let Some(pid) = pid {
            kill_group(pid);
        }
        drop(scratch);

        Ok(result)
    }

    fn command(&self, scratch: &Scratch, input: &Value) -> Command {
        let mut command = Command::new(self.config.program());
        command
            .arg(scratch.harness_path())
            .current_dir(&self.config.temp_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.config.inherit_env {
            let path = std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into());
            command.env_clear().env("PATH", path);
        }
        command.env(INPUT_ENV, input.to_string());

        #[cfg(unix)]
        command.process_group(0);

        command
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(
        &self,
        code: &str,
        tool_name: &str,
        input: &Value,
        timeout: Duration,
    ) -> SandboxResult {
        let started = Instant::now();
        let result = match self.execute(code, tool_name, input, timeout).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = tool_name, error = %e, "Sandbox could not run candidate");
                SandboxResult::failed(e.to_string())
            }
        };

        info!(
            tool = tool_name,
            passed = result.passed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox run finished"
        );
        result
    }

    fn name(&self) -> &str {
        match self.config.runtime {
            SandboxRuntime::Shell => "process-sandbox/shell",
            SandboxRuntime::Node => "process-sandbox/node",
        }
    }
}

// ── Child supervision ─────────────────────────────────────────────────

/// Adopts the first report line without waiting for exit; the caller's
/// `kill_group` ends the child and anything it spawned.
async fn watch_child(
    mut child: Child,
    stdout: Option<ChildStdout>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
    stderr_tail: Arc<Mutex<Tail>>,
    runtime: SandboxRuntime,
) -> SandboxResult {
    if let Some(stdout) = stdout {
        if let Some(reported) = read_report(stdout).await {
            return decode(reported, runtime);
        }
    }

    let status = child.wait().await;
    if let Some(mut task) = stderr_task {
        let _ = tokio::time::timeout(STDERR_GRACE, &mut task).await;
    }
    let stderr = stderr_tail
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .text();

    match status {
        Ok(status) => SandboxResult::failed(no_report_message(status, &stderr)),
        Err(e) => SandboxResult::failed(SandboxError::Process(e).to_string()),
    }
}

/// First stdout line that parses as a harness report, or `None` at EOF.
async fn read_report(stdout: ChildStdout) -> Option<SandboxResult> {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<SandboxResult>(line.trim()) {
            Ok(report) => return Some(report),
            Err(_) => debug!(line = %line, "Ignoring non-report stdout line"),
        }
    }
    None
}

/// Shell modules report text; JSON-looking text becomes structured output.
fn decode(mut result: SandboxResult, runtime: SandboxRuntime) -> SandboxResult {
    if runtime == SandboxRuntime::Shell {
        if let Some(Value::String(text)) = &result.output {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                result.output = Some(parsed);
            }
        }
    }
    result
}

fn no_report_message(status: ExitStatus, stderr: &str) -> String {
    let how = match status.code() {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    };
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("Sandbox process {how} without reporting a result")
    } else {
        format!("Sandbox process {how} without reporting a result: {stderr}")
    }
}

async fn collect_stderr(stderr: impl AsyncRead + Unpin, tail: Arc<Mutex<Tail>>) {
    let mut stderr = stderr;
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => tail
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(&chunk[..n]),
        }
    }
}

/// Keeps the last `cap` bytes written.
struct Tail {
    cap: usize,
    bytes: Vec<u8>,
}

impl Tail {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            bytes: Vec::new(),
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
        if self.bytes.len() > self.cap {
            let excess = self.bytes.len() - self.cap;
            self.bytes.drain(..excess);
        }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg takes no pointers. The group id is the child's pid,
    // which became a group leader through `process_group(0)`.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!(pgid, "Killed sandbox process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

// ── Scratch files ─────────────────────────────────────────────────────

/// Module and harness files for one run; removed on drop.
struct Scratch {
    _module: NamedTempFile,
    harness: NamedTempFile,
}

impl Scratch {
    fn create(config: &SandboxConfig, tool_name: &str, code: &str) -> Result<Self, SandboxError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let stem = format!("{}-{}", slugify(tool_name, "tool"), millis);
        let ext = config.runtime.module_extension();

        let module = write_scratch(&config.temp_dir, &format!("{stem}-module-"), ext, code)?;
        let script = harness::render(config.runtime, module.path());
        let harness = write_scratch(&config.temp_dir, &format!("{stem}-harness-"), ext, &script)?;

        Ok(Self {
            _module: module,
            harness,
        })
    }

    fn harness_path(&self) -> &Path {
        self.harness.path()
    }
}

fn write_scratch(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    contents: &str,
) -> Result<NamedTempFile, SandboxError> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(SandboxError::Scratch)?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.flush())
        .map_err(SandboxError::Scratch)?;
    Ok(file)
}
