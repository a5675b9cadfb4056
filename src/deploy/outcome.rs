// ABOUTME: Terminal status and full result record of one unit's run.
// ABOUTME: Carries both raw and redacted tool output for audit and report consumers.

use serde::Serialize;
use std::time::Duration;

use crate::audit::AuditRef;
use crate::diagnostics::{Warning, WarningKind};
use crate::shard::ShardKey;
use crate::types::{Action, DeploymentUnit};

use super::backup::BackupRecord;

/// Terminal status of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    /// Another run holds the shard lock. Retryable, not a failure.
    SkippedLocked,
    PolicyRejected,
    /// Backup failed before the tool started; state untouched.
    BackupFailed,
    /// A read-only action failed; nothing to roll back.
    Failed,
    /// Mutation failed on a shard that had no prior state.
    FailedNoPriorState,
    /// Mutation failed and the backup was restored.
    RolledBack,
    /// Mutation failed and the backup could not be restored. Needs manual action.
    RollbackFailed,
    /// State only exists under a legacy key; migrate first.
    PendingMigration,
    /// The run was cancelled before this unit started.
    Cancelled,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::SkippedLocked => "skipped_locked",
            UnitStatus::PolicyRejected => "policy_rejected",
            UnitStatus::BackupFailed => "backup_failed",
            UnitStatus::Failed => "failed",
            UnitStatus::FailedNoPriorState => "failed_no_prior_state",
            UnitStatus::RolledBack => "rolled_back",
            UnitStatus::RollbackFailed => "rollback_failed",
            UnitStatus::PendingMigration => "pending_migration",
            UnitStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Succeeded)
    }

    /// Not attempted: a later run can pick the unit up unchanged.
    pub fn is_skip(&self) -> bool {
        matches!(self, UnitStatus::SkippedLocked | UnitStatus::Cancelled)
    }

    pub fn requires_operator(&self) -> bool {
        matches!(self, UnitStatus::RollbackFailed)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one unit's run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub unit: DeploymentUnit,
    pub action: Action,
    pub status: UnitStatus,
    pub shard_key: ShardKey,
    pub services: Vec<String>,
    /// Unredacted tool output. Only written to the audit record.
    pub raw_output: String,
    pub redacted_output: String,
    pub error: Option<String>,
    pub rollback_performed: bool,
    pub backup: Option<BackupRecord>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub audit_ref: Option<AuditRef>,
    pub warnings: Vec<Warning>,
}

impl ExecutionOutcome {
    /// Outcome for a unit that never got past the queue.
    pub fn not_started(
        unit: DeploymentUnit,
        action: Action,
        status: UnitStatus,
        error: Option<String>,
    ) -> Self {
        let shard_key = ShardKey::generate(&unit);
        let services = unit
            .service_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            unit,
            action,
            status,
            shard_key,
            services,
            raw_output: String::new(),
            redacted_output: String::new(),
            error,
            rollback_performed: false,
            backup: None,
            duration: Duration::ZERO,
            audit_ref: None,
            warnings: Vec::new(),
        }
    }

    pub fn audit_missing(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| w.kind == WarningKind::AuditMissing)
    }
}
