// ABOUTME: Generic per-unit run parameterized by protocol state.
// ABOUTME: Common fields travel through every transition; state types carry their own data.

use std::time::Instant;

use crate::diagnostics::{Diagnostics, Warning};
use crate::iac::ToolOutput;
use crate::redact::redact;
use crate::shard::ShardKey;
use crate::types::{Action, DeploymentUnit};

use super::backup::BackupRecord;
use super::error::DeployError;
use super::outcome::{ExecutionOutcome, UnitStatus};
use super::state::{Queued, Released};

/// One unit moving through lock, policy, backup, tool, and rollback.
///
/// The state parameter `S` decides which steps are callable, so a unit that
/// never took the lock can't release one and a failed mutation can't skip rollback.
#[derive(Debug)]
pub struct UnitRun<S> {
    pub(crate) unit: DeploymentUnit,
    pub(crate) action: Action,
    pub(crate) key: ShardKey,
    pub(crate) started: Instant,
    /// End of the unit's tool budget, set by its first tool invocation.
    pub(crate) deadline: Option<Instant>,
    pub(crate) initialized: bool,
    pub(crate) output: Option<ToolOutput>,
    pub(crate) backup: Option<BackupRecord>,
    pub(crate) rollback_performed: bool,
    pub(crate) diag: Diagnostics,
    pub(crate) state: S,
}

impl UnitRun<Queued> {
    pub fn new(unit: DeploymentUnit, action: Action) -> Self {
        let key = ShardKey::generate(&unit);
        UnitRun {
            unit,
            action,
            key,
            started: Instant::now(),
            deadline: None,
            initialized: false,
            output: None,
            backup: None,
            rollback_performed: false,
            diag: Diagnostics::default(),
            state: Queued,
        }
    }

    /// Outcome for a unit that never took the lock.
    pub fn finish(self, status: UnitStatus, error: Option<&DeployError>) -> ExecutionOutcome {
        self.into_outcome(status, error)
    }
}

impl UnitRun<Released> {
    pub fn finish(self, status: UnitStatus, error: Option<&DeployError>) -> ExecutionOutcome {
        self.into_outcome(status, error)
    }
}

impl<S> UnitRun<S> {
    pub fn unit(&self) -> &DeploymentUnit {
        &self.unit
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn shard_key(&self) -> &ShardKey {
        &self.key
    }

    pub fn output(&self) -> Option<&ToolOutput> {
        self.output.as_ref()
    }

    pub fn warn(&mut self, warning: Warning) {
        self.diag.warn(warning);
    }

    /// Move to the next state, carrying the common fields.
    pub(crate) fn transition<T>(self, state: T) -> UnitRun<T> {
        UnitRun {
            unit: self.unit,
            action: self.action,
            key: self.key,
            started: self.started,
            deadline: self.deadline,
            initialized: self.initialized,
            output: self.output,
            backup: self.backup,
            rollback_performed: self.rollback_performed,
            diag: self.diag,
            state,
        }
    }

    fn into_outcome(self, status: UnitStatus, error: Option<&DeployError>) -> ExecutionOutcome {
        let raw_output = self
            .output
            .as_ref()
            .map(ToolOutput::combined)
            .unwrap_or_default();
        let redacted_output = redact(&raw_output);
        let services = self
            .unit
            .service_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        ExecutionOutcome {
            services,
            action: self.action,
            status,
            shard_key: self.key,
            raw_output,
            redacted_output,
            error: error.map(ToString::to_string),
            rollback_performed: self.rollback_performed,
            backup: self.backup,
            duration: self.started.elapsed(),
            audit_ref: None,
            warnings: self.diag.into_warnings(),
            unit: self.unit,
        }
    }
}
