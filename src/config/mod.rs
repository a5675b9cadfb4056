// ABOUTME: Configuration types and parsing for stateward.yml.
// ABOUTME: Handles YAML parsing, env var interpolation, and destination merging.

mod deserialize;
mod env_value;
mod init;
mod tool;

pub use env_value::{EnvValue, resolve_env_map};
pub use init::init_config;
pub use tool::{DEFAULT_TOOL_PROGRAM, ToolConfig};

use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::DEFAULT_AUDIT_PREFIX;
use crate::deploy::{DEFAULT_LOCK_TTL, DEFAULT_MAX_WORKERS, DEFAULT_STORE_TIMEOUT, EngineSettings};
use crate::error::{Error, Result};
use crate::policy::DEFAULT_POLICY_TIMEOUT;
use deserialize::{deserialize_argv, deserialize_worker_cap};

pub const CONFIG_FILENAME: &str = "stateward.yml";
pub const CONFIG_FILENAME_ALT: &str = "stateward.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".stateward/config.yml";

pub const DEFAULT_UNITS_FILE: &str = "units.yml";
pub const DEFAULT_STORE_ROOT: &str = ".stateward/store";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_units_file")]
    pub units_file: PathBuf,

    #[serde(default)]
    pub tool: ToolConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub policy: Option<PolicyConfig>,

    #[serde(default)]
    pub destinations: HashMap<String, Destination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(
        default = "default_max_workers",
        deserialize_with = "deserialize_worker_cap"
    )]
    pub max_workers: usize,

    #[serde(default = "default_lock_ttl", with = "humantime_serde")]
    pub lock_ttl: Duration,

    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_timeout: Duration,

    #[serde(default = "default_true")]
    pub detect_legacy_shards: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            lock_ttl: default_lock_ttl(),
            store_timeout: default_store_timeout(),
            detect_legacy_shards: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_audit_prefix")]
    pub prefix: String,

    /// Recorded as the run's trigger, e.g. a CI pipeline id.
    #[serde(default = "default_trigger")]
    pub trigger: EnvValue,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_audit_prefix(),
            trigger: default_trigger(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(deserialize_with = "deserialize_argv")]
    pub command: NonEmpty<String>,

    #[serde(default = "default_policy_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Destination {
    #[serde(default)]
    pub units_file: Option<PathBuf>,

    #[serde(default)]
    pub store: Option<StoreConfig>,

    #[serde(default)]
    pub var_file: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

fn default_units_file() -> PathBuf {
    PathBuf::from(DEFAULT_UNITS_FILE)
}

fn default_store_root() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_ROOT)
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_lock_ttl() -> Duration {
    DEFAULT_LOCK_TTL
}

fn default_store_timeout() -> Duration {
    DEFAULT_STORE_TIMEOUT
}

fn default_policy_timeout() -> Duration {
    DEFAULT_POLICY_TIMEOUT
}

fn default_audit_prefix() -> String {
    DEFAULT_AUDIT_PREFIX.to_string()
}

fn default_trigger() -> EnvValue {
    EnvValue::from("manual")
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration");
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    pub fn for_destination(&self, name: &str) -> Result<Config> {
        let dest = self
            .destinations
            .get(name)
            .ok_or_else(|| Error::UnknownDestination(name.to_string()))?;

        let mut merged = self.clone();

        if let Some(ref units_file) = dest.units_file {
            merged.units_file = units_file.clone();
        }

        if let Some(ref store) = dest.store {
            merged.store = store.clone();
        }

        if dest.var_file.is_some() {
            merged.tool.var_file = dest.var_file.clone();
        }

        for (k, v) in &dest.env {
            merged.tool.env.insert(k.clone(), v.clone());
        }

        Ok(merged)
    }

    /// Check values serde can't express.
    pub fn validate(&self) -> Result<()> {
        if self.tool.program.trim().is_empty() {
            return Err(Error::InvalidConfig("tool.program cannot be empty".to_string()));
        }
        if self.tool.timeout.is_zero() {
            return Err(Error::InvalidConfig("tool.timeout must be positive".to_string()));
        }
        if self.execution.lock_ttl.is_zero() {
            return Err(Error::InvalidConfig(
                "execution.lock_ttl must be positive".to_string(),
            ));
        }
        if self.execution.store_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "execution.store_timeout must be positive".to_string(),
            ));
        }
        crate::store::check_key(&self.audit.prefix).map_err(|e| {
            Error::InvalidConfig(format!("audit.prefix: {e}"))
        })?;
        Ok(())
    }

    /// Settings that are valid but risky, as messages for the operator.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.execution.lock_ttl < self.tool.timeout {
            warnings.push(format!(
                "execution.lock_ttl ({}) is shorter than tool.timeout ({}); \
                 a long mutation can outlive its lock and let another run take the shard",
                humantime::format_duration(self.execution.lock_ttl),
                humantime::format_duration(self.tool.timeout),
            ));
        }
        warnings
    }

    /// Engine settings with the tool's environment resolved.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            max_workers: self.execution.max_workers,
            lock_ttl: self.execution.lock_ttl,
            store_timeout: self.execution.store_timeout,
            detect_legacy_shards: self.execution.detect_legacy_shards,
            tool: self.tool.settings()?,
        })
    }
}
