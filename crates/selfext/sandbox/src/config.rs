use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default hard timeout for one sandbox run.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default cap on captured child stderr.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Runtime that hosts the harness and the compiled module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxRuntime {
    /// POSIX shell. The module defines an `execute` function which receives
    /// the JSON input as `$1` and prints its result on stdout.
    #[default]
    Shell,
    /// Node.js. The module is CommonJS exporting `execute(input, signal)`.
    Node,
}

impl SandboxRuntime {
    pub fn default_program(&self) -> &'static str {
        match self {
            Self::Shell => "sh",
            Self::Node => "node",
        }
    }

    pub fn module_extension(&self) -> &'static str {
        match self {
            Self::Shell => ".sh",
            Self::Node => ".cjs",
        }
    }
}

/// Configuration for [`ProcessSandbox`](crate::ProcessSandbox).
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub runtime: SandboxRuntime,
    /// Interpreter override; `None` uses the runtime default.
    pub program: Option<String>,
    /// Directory for the module and harness scratch files.
    pub temp_dir: PathBuf,
    pub default_timeout: Duration,
    /// Tail of child stderr kept for diagnostics.
    pub max_output_bytes: usize,
    /// Pass the parent's environment through instead of only `PATH`.
    pub inherit_env: bool,
}

impl SandboxConfig {
    pub fn new(runtime: SandboxRuntime) -> Self {
        Self {
            runtime,
            ..Self::default()
        }
    }

    pub fn program(&self) -> &str {
        self.program
            .as_deref()
            .unwrap_or_else(|| self.runtime.default_program())
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: SandboxRuntime::Shell,
            program: None,
            temp_dir: std::env::temp_dir(),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            inherit_env: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.program(), "sh");
        assert!(!config.inherit_env);
    }

    #[test]
    fn program_override() {
        let config = SandboxConfig::new(SandboxRuntime::Node).with_program("/opt/node/bin/node");
        assert_eq!(config.program(), "/opt/node/bin/node");
        assert_eq!(config.runtime.module_extension(), ".cjs");
    }

    #[test]
    fn runtime_serde() {
        let rt: SandboxRuntime = serde_json::from_str("\"node\"").unwrap();
        assert_eq!(rt, SandboxRuntime::Node);
    }
}
