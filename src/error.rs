// ABOUTME: Application-wide error types for stateward.
// ABOUTME: Wraps configuration, discovery, and deployment errors for the CLI.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::shard::ShardKeyError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid unit in {file}: {message}")]
    InvalidUnit { file: PathBuf, message: String },

    #[error("no deployment units matched")]
    NoUnits,

    #[error(transparent)]
    ShardKey(#[from] ShardKeyError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("redaction rules failed to load: {0}")]
    Redaction(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
