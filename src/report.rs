// ABOUTME: Aggregates unit outcomes into a run report with severity buckets.
// ABOUTME: Derives the process exit code from the worst outcome.

use serde::Serialize;
use std::time::Duration;

use crate::audit::AuditRef;
use crate::deploy::{ExecutionOutcome, UnitStatus};
use crate::diagnostics::Warning;
use crate::shard::ShardKey;
use crate::types::Action;

/// Exit code when every unit succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when only lock skips occurred and `--fail-on-skip` is set.
pub const EXIT_SKIPPED: i32 = 1;
/// Exit code when a unit failed or the run was cancelled.
pub const EXIT_FAILED: i32 = 2;
/// Exit code when a rollback failed and an operator must restore state.
pub const EXIT_MANUAL_INTERVENTION: i32 = 3;

/// One unit's line in the report. Output is always the redacted copy.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub unit: String,
    pub action: Action,
    pub shard_key: ShardKey,
    pub services: Vec<String>,
    pub status: UnitStatus,
    pub output: String,
    pub error: Option<String>,
    pub rollback_performed: bool,
    pub backup_location: Option<String>,
    pub audit_ref: Option<AuditRef>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub warnings: Vec<Warning>,
}

impl From<&ExecutionOutcome> for ReportEntry {
    fn from(outcome: &ExecutionOutcome) -> Self {
        Self {
            unit: outcome.unit.name(),
            action: outcome.action,
            shard_key: outcome.shard_key.clone(),
            services: outcome.services.clone(),
            status: outcome.status,
            output: outcome.redacted_output.clone(),
            error: outcome.error.as_deref().map(crate::redact::redact),
            rollback_performed: outcome.rollback_performed,
            backup_location: outcome.backup.as_ref().map(|b| b.backup_location.clone()),
            audit_ref: outcome.audit_ref.clone(),
            duration: outcome.duration,
            warnings: outcome.warnings.clone(),
        }
    }
}

/// Counts per severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped_locked: usize,
    pub rolled_back: usize,
    pub manual_intervention_required: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending_migration: usize,
    pub policy_rejected: usize,
    pub audit_missing: usize,
    pub duration_secs: f64,
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub successful: Vec<ReportEntry>,
    pub failed: Vec<ReportEntry>,
    pub skipped: Vec<ReportEntry>,
    pub summary: Summary,
}

impl RunReport {
    pub fn new(outcomes: &[ExecutionOutcome], duration: Duration) -> Self {
        let mut report = RunReport {
            successful: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            summary: Summary {
                total: outcomes.len(),
                duration_secs: duration.as_secs_f64(),
                ..Summary::default()
            },
        };

        for outcome in outcomes {
            let summary = &mut report.summary;
            match outcome.status {
                UnitStatus::Succeeded => summary.succeeded += 1,
                UnitStatus::SkippedLocked => summary.skipped_locked += 1,
                UnitStatus::Cancelled => summary.cancelled += 1,
                UnitStatus::RolledBack => summary.rolled_back += 1,
                UnitStatus::RollbackFailed => summary.manual_intervention_required += 1,
                UnitStatus::PendingMigration => summary.pending_migration += 1,
                UnitStatus::PolicyRejected => summary.policy_rejected += 1,
                UnitStatus::BackupFailed | UnitStatus::Failed | UnitStatus::FailedNoPriorState => {
                    summary.failed += 1
                }
            }
            if outcome.audit_missing() {
                summary.audit_missing += 1;
            }

            let entry = ReportEntry::from(outcome);
            if outcome.status.is_success() {
                report.successful.push(entry);
            } else if outcome.status.is_skip() {
                report.skipped.push(entry);
            } else {
                report.failed.push(entry);
            }
        }
        report
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// 3 if any rollback failed, 2 for any other failure or a cancelled unit,
    /// 1 for lock skips when `fail_on_skip` is set, 0 otherwise.
    pub fn exit_code(&self, fail_on_skip: bool) -> i32 {
        let summary = &self.summary;
        if summary.manual_intervention_required > 0 {
            EXIT_MANUAL_INTERVENTION
        } else if !self.failed.is_empty() || summary.cancelled > 0 {
            EXIT_FAILED
        } else if fail_on_skip && summary.skipped_locked > 0 {
            EXIT_SKIPPED
        } else {
            EXIT_SUCCESS
        }
    }
}
