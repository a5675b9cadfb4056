// ABOUTME: Configuration of the external IaC tool.
// ABOUTME: Resolves environment references into the settings used for every invocation.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::iac::{DEFAULT_TOOL_TIMEOUT, ToolSettings};

use super::EnvValue;

pub const DEFAULT_TOOL_PROGRAM: &str = "terraform";

#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_tool_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Run `init` before every action.
    #[serde(default = "default_init")]
    pub init: bool,

    #[serde(default)]
    pub var_file: Option<PathBuf>,

    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout: default_tool_timeout(),
            init: default_init(),
            var_file: None,
            extra_args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

impl ToolConfig {
    /// Settings with every environment reference resolved.
    pub fn settings(&self) -> Result<ToolSettings> {
        Ok(ToolSettings {
            timeout: self.timeout,
            init: self.init,
            var_file: self.var_file.clone(),
            extra_args: self.extra_args.clone(),
            env: super::resolve_env_map(&self.env)?,
        })
    }
}

fn default_program() -> String {
    DEFAULT_TOOL_PROGRAM.to_string()
}

fn default_tool_timeout() -> Duration {
    DEFAULT_TOOL_TIMEOUT
}

fn default_init() -> bool {
    true
}
