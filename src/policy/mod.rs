// ABOUTME: Policy gate consulted before any mutating action.
// ABOUTME: Gates judge the tool's planned changes; the rule evaluator itself is external.

mod command;

pub use command::{CommandGate, DEFAULT_POLICY_TIMEOUT, PLAN_FILE_ENV};

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::iac::format_elapsed;
use crate::shard::ShardKey;
use crate::types::{Action, DeploymentUnit};

/// Pass/fail verdict with the violations that caused a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyVerdict {
    pub passed: bool,
    pub violations: Vec<String>,
}

impl PolicyVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    pub fn fail(violations: Vec<String>) -> Self {
        Self {
            passed: false,
            violations,
        }
    }
}

/// Errors evaluating a policy. The engine treats every error as a failed verdict.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to run policy command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("policy command timed out after {}", format_elapsed(*.0))]
    Timeout(Duration),
}

/// What the tool's plan step reported for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChanges {
    /// Plan file the tool was asked to save with `--out`.
    pub file: PathBuf,
    /// Everything the plan step printed on stdout.
    pub output: String,
}

#[async_trait]
pub trait PolicyGate: Send + Sync + 'static {
    async fn evaluate(
        &self,
        unit: &DeploymentUnit,
        key: &ShardKey,
        action: Action,
        plan: &PlannedChanges,
    ) -> Result<PolicyVerdict, PolicyError>;
}

/// Gate that approves everything. Used when no policy command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PolicyGate for AllowAll {
    async fn evaluate(
        &self,
        _unit: &DeploymentUnit,
        _key: &ShardKey,
        _action: Action,
        _plan: &PlannedChanges,
    ) -> Result<PolicyVerdict, PolicyError> {
        Ok(PolicyVerdict::pass())
    }
}
