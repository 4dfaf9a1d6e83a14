//! Host shell runner - executes step bodies as subprocesses

use crate::runner::{
    parse_env_exports, CommandOutput, CommandRequest, CommandRunner, RunnerError, ENV_FILE_VAR,
};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands through `<shell> -c <command>`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    default_shell: String,
}

impl ShellRunner {
    pub fn new(default_shell: impl Into<String>) -> Self {
        Self {
            default_shell: default_shell.into(),
        }
    }

    pub fn default_shell(&self) -> &str {
        &self.default_shell
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, RunnerError> {
        let shell = request.shell.as_deref().unwrap_or(&self.default_shell);
        if !self.tool_available(shell) {
            return Err(RunnerError::ToolMissing(shell.to_string()));
        }

        let env_file = tempfile::NamedTempFile::new()?;
        debug!(
            "Step '{}': spawning {} in {}",
            request.step,
            shell,
            request.working_dir.display()
        );

        // dropping the future kills the child, which is how step timeouts stop it
        let output = Command::new(shell)
            .arg("-c")
            .arg(&request.command)
            .env_clear()
            .envs(&request.env)
            .env(ENV_FILE_VAR, env_file.path())
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunnerError::Spawn(format!("{}: {}", shell, e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!("Step '{}' exited with code {}", request.step, exit_code);
        }

        let exported = tokio::fs::read_to_string(env_file.path()).await.unwrap_or_default();

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exported_env: parse_env_exports(&exported),
        })
    }

    fn tool_available(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }
}
