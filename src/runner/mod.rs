//! Command runners - how step bodies reach the host

pub mod shell;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

pub use shell::ShellRunner;

/// Name of the variable pointing at the env export file of a step
pub const ENV_FILE_VAR: &str = "GANTRY_ENV";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("required tool '{0}' was not found on PATH")]
    ToolMissing(String),

    #[error("failed to spawn command: {0}")]
    Spawn(String),

    #[error("runner I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One opaque command to execute
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Step name, for logs
    pub step: String,
    pub command: String,
    /// Shell program; the runner default applies when absent
    pub shell: Option<String>,
    /// Complete environment of the child process
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// `KEY=VALUE` pairs the command exported for later steps
    pub exported_env: HashMap<String, String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is not an error.
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, RunnerError>;

    /// Whether `tool` can be found on this host
    fn tool_available(&self, tool: &str) -> bool;
}

/// Parse `KEY=VALUE` lines; blank lines and `#` comments are ignored
pub fn parse_env_exports(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .collect()
}
