//! Configuration for the selfext binary

use std::path::PathBuf;

use selfext_compiler::CompilerOutput;
use selfext_sandbox::{SandboxRuntime, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfExtConfig {
    /// Repository holding the agent's tools
    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub sandbox: SandboxSection,

    #[serde(default)]
    pub compiler: CompilerConfig,

    /// Ledger and promotion-control backend
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub promotion: PromotionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_repository_path")]
    pub path: PathBuf,

    #[serde(default = "default_git_program")]
    pub git_program: String,

    /// Commit identity; the repository's own config is used when unset
    #[serde(default)]
    pub author_name: Option<String>,

    #[serde(default)]
    pub author_email: Option<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: default_repository_path(),
            git_program: default_git_program(),
            author_name: None,
            author_email: None,
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default)]
    pub runtime: SandboxRuntime,

    /// Interpreter override; the runtime's default when unset
    #[serde(default)]
    pub program: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default)]
    pub inherit_env: bool,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            runtime: SandboxRuntime::default(),
            program: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            inherit_env: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerKind {
    /// Use the source unchanged
    Passthrough,
    /// Pipe the source through an external program
    Command,
}

/// Compiler configuration. Defaults to a `sh -n` syntax check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default = "default_compiler_kind")]
    pub kind: CompilerKind,

    #[serde(default = "default_compiler_program")]
    pub program: String,

    #[serde(default = "default_compiler_args")]
    pub args: Vec<String>,

    #[serde(default = "default_compiler_output")]
    pub output: CompilerOutput,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            kind: default_compiler_kind(),
            program: default_compiler_program(),
            args: default_compiler_args(),
            output: default_compiler_output(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage; nothing survives the process
    #[default]
    Memory,

    /// SQLite storage
    Sqlite {
        /// Connection URL, e.g. `sqlite://selfext.db?mode=rwc`
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Contexts the gate requires; the gate defaults when unset
    #[serde(default)]
    pub required_contexts: Option<Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_repository_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_git_program() -> String {
    "git".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_compiler_kind() -> CompilerKind {
    CompilerKind::Command
}

fn default_compiler_program() -> String {
    "sh".to_string()
}

fn default_compiler_args() -> Vec<String> {
    vec!["-n".to_string()]
}

fn default_compiler_output() -> CompilerOutput {
    CompilerOutput::Source
}

fn default_pool_size() -> u32 {
    5
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl SelfExtConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `SELFEXT_*` environment variables (`SELFEXT_STORAGE__TYPE=sqlite`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&SelfExtConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SELFEXT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SelfExtConfig::default();
        assert_eq!(config.repository.path, PathBuf::from("."));
        assert_eq!(config.sandbox.timeout_ms, 30_000);
        assert_eq!(config.compiler.kind, CompilerKind::Command);
        assert_eq!(config.compiler.args, vec!["-n".to_string()]);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert!(config.promotion.required_contexts.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[sandbox]
runtime = "node"
timeout_ms = 5000

[storage]
type = "sqlite"
url = "sqlite://ledger.db?mode=rwc"

[promotion]
required_contexts = ["ci/build"]
"#
        )
        .unwrap();

        let config = SelfExtConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.sandbox.runtime, SandboxRuntime::Node);
        assert_eq!(config.sandbox.timeout_ms, 5000);
        assert_eq!(config.repository.git_program, "git");
        match config.storage {
            StorageConfig::Sqlite {
                url,
                max_connections,
            } => {
                assert_eq!(url, "sqlite://ledger.db?mode=rwc");
                assert_eq!(max_connections, 5);
            }
            other => panic!("unexpected storage {other:?}"),
        }
        assert_eq!(
            config.promotion.required_contexts,
            Some(vec!["ci/build".to_string()])
        );
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let config = SelfExtConfig::load(Some("/nonexistent/selfext")).unwrap();
        assert_eq!(config.logging.level, "warn");
    }
}
