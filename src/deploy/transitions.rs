// ABOUTME: State transition methods for the per-unit protocol.
// ABOUTME: Each method consumes self and returns the next state, or the state to recover from.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::diagnostics::Warning;
use crate::iac::{IacTool, Invocation, Step, ToolOutput, ToolSettings};
use crate::policy::{PlannedChanges, PolicyGate};
use crate::shard::Migrator;
use crate::types::HolderId;

use super::UnitRun;
use super::backup::{BackupManager, BackupOutcome};
use super::error::DeployError;
use super::lock::{LockAcquisition, LockManager};
use super::outcome::UnitStatus;
use super::state::{
    Executed, Faulted, Gated, Guarded, HoldsLock, Locked, Queued, Recovered, Released,
};

/// Result type for transitions that may need recovery on failure.
pub type TransitionResult<T, S> = Result<UnitRun<T>, (UnitRun<S>, DeployError)>;

// =============================================================================
// Queued -> Locked
// =============================================================================

impl UnitRun<Queued> {
    /// Take the shard lock with a single atomic attempt.
    ///
    /// # Errors
    ///
    /// Returns `(self, DeployError::LockConflict)` if the lock is held or the
    /// lock store is unavailable.
    #[must_use = "unit run state must be used"]
    pub async fn acquire_lock(
        self,
        locks: &LockManager,
        holder: &HolderId,
        ttl: Duration,
    ) -> TransitionResult<Locked, Queued> {
        match locks.acquire(&self.key, holder, ttl).await {
            LockAcquisition::Acquired(lock) => Ok(self.transition(Locked { lock })),
            refused => {
                let err = refused
                    .into_conflict(&self.key)
                    .unwrap_or_else(|| DeployError::lock_conflict(self.key.as_str(), "unknown"));
                Err((self, err))
            }
        }
    }
}

// =============================================================================
// Locked -> Gated | Executed
// =============================================================================

impl UnitRun<Locked> {
    /// Refuse to run from empty state when state only exists under a legacy key.
    ///
    /// A failed check is recorded as a warning and does not stop the unit.
    ///
    /// # Errors
    ///
    /// Returns `(self, DeployError::MigrationRequired)` when a migration is pending.
    #[must_use = "unit run state must be used"]
    pub async fn check_legacy(mut self, migrator: &Migrator) -> TransitionResult<Locked, Locked> {
        match migrator.detect(&self.unit).await {
            Ok(detection) if detection.is_pending() => {
                let legacy = detection
                    .legacy
                    .iter()
                    .map(|snapshot| snapshot.key.to_string())
                    .collect();
                let err = DeployError::MigrationRequired {
                    key: self.key.to_string(),
                    legacy,
                };
                Err((self, err))
            }
            Ok(_) => Ok(self),
            Err(e) => {
                self.warn(Warning::migration_check(format!(
                    "legacy shard check for {} failed: {}",
                    self.key, e
                )));
                Ok(self)
            }
        }
    }

    /// Plan the mutation, then ask the policy gate whether it may proceed.
    /// Gate errors fail closed.
    ///
    /// # Errors
    ///
    /// Returns `(self, DeployError::ToolExecution)` if the plan step failed and
    /// `(self, DeployError::PolicyRejected)` with the violations if the gate refused.
    #[must_use = "unit run state must be used"]
    pub async fn check_policy<T: IacTool + ?Sized, G: PolicyGate + ?Sized>(
        mut self,
        tool: &T,
        gate: &G,
        settings: &ToolSettings,
    ) -> TransitionResult<Gated, Locked> {
        let file = plan_file(&self.key);
        let output = match self.run_tool(tool, Step::Plan, settings, Some(&file)).await {
            Ok(output) => output,
            Err(e) => {
                discard_plan(&file).await;
                return Err((self, e));
            }
        };
        let plan = PlannedChanges { file, output };

        let verdict = gate.evaluate(&self.unit, &self.key, self.action, &plan).await;
        discard_plan(&plan.file).await;
        let violations = match verdict {
            Ok(verdict) if verdict.passed => {
                let lock = self.state.lock.clone();
                return Ok(self.transition(Gated { lock }));
            }
            Ok(verdict) => verdict.violations,
            Err(e) => vec![format!("policy gate error: {e}")],
        };
        let err = DeployError::PolicyRejected {
            key: self.key.to_string(),
            violations,
        };
        Err((self, err))
    }

    /// Run a read-only action. No backup is taken and nothing is rolled back.
    ///
    /// # Errors
    ///
    /// Returns `(self, DeployError::ToolExecution)` if the tool failed.
    #[must_use = "unit run state must be used"]
    pub async fn run_read_only<T: IacTool + ?Sized>(
        mut self,
        tool: &T,
        settings: &ToolSettings,
    ) -> TransitionResult<Executed, Locked> {
        let step = Step::from(self.action);
        match self.run_tool(tool, step, settings, None).await {
            Ok(_) => {
                let lock = self.state.lock.clone();
                Ok(self.transition(Executed { lock }))
            }
            Err(e) => Err((self, e)),
        }
    }
}

// =============================================================================
// Gated -> Guarded
// =============================================================================

impl UnitRun<Gated> {
    /// Copy the current state aside. Must complete before the tool starts.
    ///
    /// # Errors
    ///
    /// Returns `(self, DeployError::Backup)`; the tool must not run.
    #[must_use = "unit run state must be used"]
    pub async fn back_up(mut self, backups: &BackupManager) -> TransitionResult<Guarded, Gated> {
        match backups.backup(&self.key, &self.unit.name()).await {
            Ok(backup) => {
                self.backup = backup.record().cloned();
                let lock = self.state.lock.clone();
                Ok(self.transition(Guarded { lock, backup }))
            }
            Err(e) => Err((self, e)),
        }
    }
}

// =============================================================================
// Guarded -> Executed | Faulted
// =============================================================================

impl UnitRun<Guarded> {
    pub fn backup_outcome(&self) -> &BackupOutcome {
        &self.state.backup
    }

    /// Run the mutating action.
    ///
    /// # Errors
    ///
    /// Returns `(Faulted, DeployError::ToolExecution)` on failure or timeout.
    /// The faulted run must be rolled back before its lock can be released.
    #[must_use = "unit run state must be used"]
    pub async fn run_mutation<T: IacTool + ?Sized>(
        mut self,
        tool: &T,
        settings: &ToolSettings,
    ) -> TransitionResult<Executed, Faulted> {
        let step = Step::from(self.action);
        let result = self.run_tool(tool, step, settings, None).await;
        let Guarded { lock, backup } = self.state.clone();
        match result {
            Ok(_) => Ok(self.transition(Executed { lock })),
            Err(e) => Err((self.transition(Faulted { lock, backup }), e)),
        }
    }
}

// =============================================================================
// Faulted -> Recovered
// =============================================================================

impl UnitRun<Faulted> {
    /// Restore the pre-mutation snapshot. Always attempted after a failed mutation.
    #[must_use = "unit run state must be used"]
    pub async fn roll_back(mut self, backups: &BackupManager) -> UnitRun<Recovered> {
        let Faulted { lock, backup } = self.state.clone();
        let status = match &backup {
            BackupOutcome::NoPriorState => {
                tracing::warn!(key = %self.key, "mutation failed with no prior state to restore");
                UnitStatus::FailedNoPriorState
            }
            BackupOutcome::Created(record) => {
                self.rollback_performed = true;
                if backups.rollback(record).await {
                    UnitStatus::RolledBack
                } else {
                    tracing::error!(
                        key = %self.key,
                        backup = %record.backup_location,
                        "rollback failed, manual restore required"
                    );
                    UnitStatus::RollbackFailed
                }
            }
        };
        self.transition(Recovered { lock, status })
    }
}

impl UnitRun<Recovered> {
    pub fn status(&self) -> UnitStatus {
        self.state.status
    }
}

// =============================================================================
// Any lock-holding state -> Released
// =============================================================================

impl<S: HoldsLock> UnitRun<S> {
    /// Release the shard lock. A failed release becomes a warning; the lock
    /// then expires with its TTL.
    pub async fn release(mut self, locks: &LockManager) -> UnitRun<Released> {
        let holder = self.state.lock().holder_id.clone();
        if let Err(e) = locks.release(&self.key, &holder).await {
            self.warn(Warning::lock_release(format!(
                "failed to release lock on {}: {}",
                self.key, e
            )));
        }
        self.transition(Released)
    }
}

// =============================================================================
// Internal Helpers
// =============================================================================

impl<S> UnitRun<S> {
    /// Run `init` (once per unit, if enabled) then `step`, keeping all output.
    ///
    /// Every invocation gets what is left of the unit's time budget, which
    /// starts with its first tool invocation. Returns the stdout of `step`.
    async fn run_tool<T: IacTool + ?Sized>(
        &mut self,
        tool: &T,
        step: Step,
        settings: &ToolSettings,
        plan_out: Option<&Path>,
    ) -> Result<String, DeployError> {
        let mut steps = Vec::with_capacity(2);
        if settings.init && !self.initialized {
            steps.push(Step::Init);
        }
        steps.push(step);

        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + settings.timeout);
        let mut collected = self.output.take().unwrap_or_default();
        let mut last_stdout = String::new();
        for current in steps {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let output = if remaining.is_zero() {
                ToolOutput::budget_exhausted(current)
            } else {
                let mut invocation = Invocation::for_unit(current, &self.unit, &self.key, settings)
                    .with_timeout(remaining);
                if current == Step::Plan
                    && let Some(path) = plan_out
                {
                    invocation = invocation.with_plan_out(path, self.action);
                }
                tracing::debug!(key = %self.key, step = %current, budget = ?remaining, "invoking tool");
                tool.run(&invocation).await
            };
            let succeeded = output.succeeded_for(current);
            let reason = output.failure_reason(current);
            last_stdout.clone_from(&output.stdout);
            collected.append(output);
            if !succeeded {
                self.output = Some(collected);
                return Err(DeployError::tool(current.as_str(), reason));
            }
            if current == Step::Init {
                self.initialized = true;
            }
        }
        self.output = Some(collected);
        Ok(last_stdout)
    }
}

/// Temporary location for a unit's saved plan.
fn plan_file(key: &crate::shard::ShardKey) -> PathBuf {
    let stem = key.as_str().replace('/', "-");
    let id = uuid::Uuid::new_v4().simple();
    std::env::temp_dir().join(format!("stateward-{stem}-{id}.plan"))
}

async fn discard_plan(file: &Path) {
    if let Err(e) = tokio::fs::remove_file(file).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(file = %file.display(), error = %e, "failed to remove plan file");
    }
}
