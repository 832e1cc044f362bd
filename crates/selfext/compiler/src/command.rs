//! Compilation by piping source through an external tool.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::compiler::{CompiledModule, Compiler};
use crate::error::CompilationError;

/// Where the executable module comes from after a successful run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerOutput {
    /// The tool emits the transpiled module on stdout.
    Stdout,
    /// The tool only validates; the source itself is the module.
    Source,
}

/// Runs an external program with the candidate on stdin.
///
/// A non-zero exit is a compilation failure whose diagnostics are every
/// non-empty line the tool printed. On success, stderr lines are warnings.
#[derive(Clone, Debug)]
pub struct CommandCompiler {
    name: String,
    program: String,
    args: Vec<String>,
    output: CompilerOutput,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>, output: CompilerOutput) -> Self {
        let program = program.into();
        let name = std::iter::once(program.clone())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            name,
            program,
            args,
            output,
        }
    }

    /// POSIX shell syntax check (`sh -n`).
    pub fn shell_syntax() -> Self {
        Self::new("sh", vec!["-n".into()], CompilerOutput::Source)
    }

    /// TypeScript to CommonJS via `esbuild`.
    pub fn typescript() -> Self {
        Self::new(
            "esbuild",
            vec![
                "--loader=ts".into(),
                "--format=cjs".into(),
                "--platform=node".into(),
                "--log-level=warning".into(),
            ],
            CompilerOutput::Stdout,
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    async fn compile(&self, source: &str) -> Result<CompiledModule, CompilationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CompilationError::single(format!(
                    "failed to start compiler `{}`: {}",
                    self.program, e
                ))
            })?;

        // Feed stdin concurrently so a chatty compiler cannot fill its
        // stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            let bytes = source.as_bytes().to_vec();
            tokio::spawn(async move {
                // The tool may exit before reading everything (e.g. early
                // syntax error); a broken pipe is not our failure.
                let _ = stdin.write_all(&bytes).await;
                let _ = stdin.shutdown().await;
            })
        });

        let output = child.wait_with_output().await.map_err(|e| {
            CompilationError::single(format!("compiler `{}` failed: {}", self.program, e))
        })?;
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            compiler = %self.name,
            status = ?output.status.code(),
            "Compiler finished"
        );

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut diagnostics = lines(&stderr);
            diagnostics.extend(lines(&stdout));
            if diagnostics.is_empty() {
                diagnostics.push(format!("`{}` exited with {}", self.name, output.status));
            }
            return Err(CompilationError::new(diagnostics));
        }

        let code = match self.output {
            CompilerOutput::Source => source.to_string(),
            CompilerOutput::Stdout => String::from_utf8(output.stdout).map_err(|_| {
                CompilationError::single(format!("`{}` produced non-UTF-8 output", self.name))
            })?,
        };

        Ok(CompiledModule {
            code,
            warnings: lines(&stderr),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(String::from)
        .collect()
}
