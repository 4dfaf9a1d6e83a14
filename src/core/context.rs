//! Instance context - the variables visible to one job instance

use crate::core::condition::VariableSource;
use crate::core::matrix::MatrixValues;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Variables available to conditions and templates of a single job instance
///
/// Lookups use dotted names:
/// `matrix.<axis>`, `env.<NAME>`, `event.<key>` (alias `invocation.<key>`),
/// `vars.<name>`, `runner.os`, `runner.arch`, `run.id`, `pipeline.name`,
/// `job.id`, `job.name`, `instance.id`, `instance.name`, `instance.index`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceContext {
    /// Id of the run executing the instance; empty until scheduled
    #[serde(default)]
    pub run_id: String,
    pub pipeline: String,
    pub job_id: String,
    pub job_name: String,
    pub instance_id: String,
    pub instance_name: String,
    pub instance_index: usize,

    /// Matrix point of this instance (axis values plus include fields)
    pub matrix: MatrixValues,

    /// Invocation context, e.g. which channel or event triggered the run
    pub invocation: HashMap<String, String>,

    /// Pipeline variables
    pub variables: HashMap<String, String>,

    /// Resolved job environment
    pub env: HashMap<String, String>,
}

impl InstanceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitute `{name}` placeholders. `extra` is consulted before the
    /// context itself; unknown names render as the empty string.
    pub fn render(&self, template: &str, extra: &HashMap<String, String>) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                extra
                    .get(name)
                    .cloned()
                    .or_else(|| self.lookup(name))
                    .unwrap_or_default()
            })
            .into_owned()
    }

    /// Environment variables describing the instance, exported to every step
    pub fn instance_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        for (axis, value) in self.matrix.iter() {
            env.insert(format!("MATRIX_{}", env_key(axis)), value.to_string());
        }
        env.insert("GANTRY_RUN_ID".to_string(), self.run_id.clone());
        env.insert("GANTRY_PIPELINE".to_string(), self.pipeline.clone());
        env.insert("GANTRY_JOB".to_string(), self.job_id.clone());
        env.insert("GANTRY_INSTANCE".to_string(), self.instance_id.clone());
        env
    }
}

impl VariableSource for InstanceContext {
    fn lookup(&self, name: &str) -> Option<String> {
        let (scope, key) = name.split_once('.')?;
        match scope {
            "matrix" => self.matrix.get(key).map(str::to_string),
            "env" => self.env.get(key).cloned(),
            "event" | "invocation" => self.invocation.get(key).cloned(),
            "vars" => self.variables.get(key).cloned(),
            "runner" => match key {
                "os" => Some(std::env::consts::OS.to_string()),
                "arch" => Some(std::env::consts::ARCH.to_string()),
                _ => None,
            },
            "run" if key == "id" => Some(self.run_id.clone()),
            "pipeline" if key == "name" => Some(self.pipeline.clone()),
            "job" => match key {
                "id" => Some(self.job_id.clone()),
                "name" => Some(self.job_name.clone()),
                _ => None,
            },
            "instance" => match key {
                "id" => Some(self.instance_id.clone()),
                "name" => Some(self.instance_name.clone()),
                "index" => Some(self.instance_index.to_string()),
                _ => None,
            },
            _ => None,
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}")
            .expect("placeholder pattern is valid")
    })
}

/// Uppercase an axis name into an environment variable suffix
fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
