//! Step domain model

use crate::cache::CacheSpec;
use crate::core::condition::Condition;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// What a step does
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Run a command body through a shell
    Run {
        command: String,
        /// Shell program; the runner default applies when absent
        shell: Option<String>,
    },
    /// Restore a cache now and save it once the job body has run
    Cache(CacheSpec),
}

/// A single step of a job
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,

    /// Run only when this evaluates true (always runs when absent)
    pub condition: Option<Condition>,

    pub action: StepAction,

    /// Environment overlay applied on top of the job environment
    pub env: HashMap<String, String>,

    /// Record a failure but keep executing later steps
    pub continue_on_error: bool,

    pub timeout: Option<Duration>,

    /// Relative to the workspace
    pub working_directory: Option<PathBuf>,

    /// Tools that must be present on the host
    pub requires: Vec<String>,
}

impl Step {
    fn with_action(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            condition: None,
            action,
            env: HashMap::new(),
            continue_on_error: false,
            timeout: None,
            working_directory: None,
            requires: Vec::new(),
        }
    }

    /// A step running `command` in the default shell
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_action(
            name,
            StepAction::Run {
                command: command.into(),
                shell: None,
            },
        )
    }

    /// A cache restore/save step
    pub fn cache(name: impl Into<String>, spec: CacheSpec) -> Self {
        Self::with_action(name, StepAction::Cache(spec))
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(Condition::parse(condition));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_shell(mut self, program: impl Into<String>) -> Self {
        if let StepAction::Run { shell, .. } = &mut self.action {
            *shell = Some(program.into());
        }
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn requiring(mut self, tool: impl Into<String>) -> Self {
        self.requires.push(tool.into());
        self
    }

    /// Short description of the step kind for logs
    pub fn kind(&self) -> &'static str {
        match self.action {
            StepAction::Run { .. } => "run",
            StepAction::Cache(_) => "cache",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepDefaults {
    pub timeout: Option<Duration>,
}
