// ABOUTME: Execution engine running many deployment units concurrently.
// ABOUTME: A fixed worker pool drains a shared queue; one aggregator collects every outcome.

use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::audit::{AuditRecorder, RunMetadata};
use crate::diagnostics::Warning;
use crate::iac::{IacTool, ToolSettings};
use crate::policy::{AllowAll, PolicyGate};
use crate::shard::{Migrator, ShardKey};
use crate::store::{AtomicStore, ObjectStore};
use crate::types::{Action, DeploymentUnit, HolderId};

use super::backup::BackupManager;
use super::error::{DeployError, DeployErrorKind};
use super::lock::{DEFAULT_LOCK_TTL, DEFAULT_STORE_TIMEOUT, LockManager};
use super::outcome::{ExecutionOutcome, UnitStatus};
use super::unit_run::UnitRun;

/// Upper bound on concurrent units unless configured otherwise.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Run-wide knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_workers: usize,
    pub lock_ttl: Duration,
    pub store_timeout: Duration,
    /// Refuse units whose state only exists under a legacy key.
    pub detect_legacy_shards: bool,
    pub tool: ToolSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            lock_ttl: DEFAULT_LOCK_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            detect_legacy_shards: true,
            tool: ToolSettings::default(),
        }
    }
}

/// `min(2 × cores, max_workers, units)`, never below one.
pub fn worker_count(max_workers: usize, units: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (2 * cores).min(max_workers).min(units).max(1)
}

/// Collects the collaborators of an [`Engine`].
pub struct EngineBuilder {
    objects: Arc<dyn ObjectStore>,
    atomic: Arc<dyn AtomicStore>,
    tool: Arc<dyn IacTool>,
    policy: Arc<dyn PolicyGate>,
    audit_prefix: Option<String>,
    metadata: RunMetadata,
    settings: EngineSettings,
}

impl EngineBuilder {
    pub fn policy(mut self, policy: Arc<dyn PolicyGate>) -> Self {
        self.policy = policy;
        self
    }

    /// Write an audit record for every unit under `prefix`.
    pub fn audit(mut self, prefix: impl Into<String>) -> Self {
        self.audit_prefix = Some(prefix.into());
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Engine {
        let timeout = self.settings.store_timeout;
        let locks = LockManager::new(self.atomic).with_timeout(timeout);
        let backups = BackupManager::new(self.objects.clone()).with_timeout(timeout);
        let audit = self
            .audit_prefix
            .map(|prefix| AuditRecorder::new(self.objects.clone(), prefix).with_timeout(timeout));

        let mut migrator =
            Migrator::new(self.objects, locks.clone(), backups.clone()).with_timeout(timeout);
        if let Some(audit) = &audit {
            migrator = migrator.with_audit(audit.clone());
        }

        Engine {
            inner: Arc::new(EngineInner {
                holder: self.metadata.holder_id.clone(),
                locks,
                backups,
                migrator,
                tool: self.tool,
                policy: self.policy,
                audit,
                metadata: self.metadata,
                settings: self.settings,
            }),
        }
    }
}

/// Runs units through the per-unit protocol, several at a time.
///
/// Cloning is cheap; clones share the same collaborators.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    holder: HolderId,
    locks: LockManager,
    backups: BackupManager,
    migrator: Migrator,
    tool: Arc<dyn IacTool>,
    policy: Arc<dyn PolicyGate>,
    audit: Option<AuditRecorder>,
    metadata: RunMetadata,
    settings: EngineSettings,
}

type Job = (usize, DeploymentUnit);

impl Engine {
    pub fn builder(
        objects: Arc<dyn ObjectStore>,
        atomic: Arc<dyn AtomicStore>,
        tool: Arc<dyn IacTool>,
        metadata: RunMetadata,
    ) -> EngineBuilder {
        EngineBuilder {
            objects,
            atomic,
            tool,
            policy: Arc::new(AllowAll),
            audit_prefix: None,
            metadata,
            settings: EngineSettings::default(),
        }
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.inner.metadata
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    pub fn backups(&self) -> &BackupManager {
        &self.inner.backups
    }

    pub fn migrator(&self) -> &Migrator {
        &self.inner.migrator
    }

    /// Run `action` on every unit. Returns one outcome per unit, in input order.
    ///
    /// Once `cancel` turns true no further unit is started; units already
    /// running finish their protocol and the rest are reported `Cancelled`.
    pub async fn run(
        &self,
        units: Vec<DeploymentUnit>,
        action: Action,
        cancel: watch::Receiver<bool>,
    ) -> Vec<ExecutionOutcome> {
        if units.is_empty() {
            return Vec::new();
        }

        let total = units.len();
        let workers = worker_count(self.inner.settings.max_workers, total);
        tracing::info!(
            units = total,
            workers,
            action = %action,
            correlation = %self.inner.metadata.correlation_id,
            "starting run"
        );

        let queue: Arc<Mutex<VecDeque<Job>>> =
            Arc::new(Mutex::new(units.iter().cloned().enumerate().collect()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ExecutionOutcome)>();

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let inner = self.inner.clone();
                let queue = queue.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let Some((index, unit)) = queue.lock().pop_front() else {
                            break;
                        };
                        let outcome = if *cancel.borrow() {
                            ExecutionOutcome::not_started(
                                unit,
                                action,
                                UnitStatus::Cancelled,
                                Some("run cancelled before the unit started".to_string()),
                            )
                        } else {
                            tracing::debug!(worker, unit = %unit, "picked up unit");
                            inner.execute(unit, action).await
                        };
                        if tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let mut slots: Vec<Option<ExecutionOutcome>> = vec![None; total];
        while let Some((index, outcome)) = rx.recv().await {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(outcome);
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task terminated abnormally");
            }
        }

        slots
            .into_iter()
            .zip(units)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| {
                    ExecutionOutcome::not_started(
                        unit,
                        action,
                        UnitStatus::Failed,
                        Some("unit was not processed by any worker".to_string()),
                    )
                })
            })
            .collect()
    }
}

impl EngineInner {
    /// Run one unit's protocol, record it in the audit log, and report it.
    async fn execute(&self, unit: DeploymentUnit, action: Action) -> ExecutionOutcome {
        let key = ShardKey::generate(&unit);
        let protocol = AssertUnwindSafe(self.drive(unit.clone(), action)).catch_unwind();
        let mut outcome = match protocol.await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(key = %key, "unit protocol panicked, releasing lock");
                let mut outcome = ExecutionOutcome::not_started(
                    unit,
                    action,
                    UnitStatus::Failed,
                    Some("internal error: unit protocol panicked".to_string()),
                );
                if let Err(e) = self.locks.release(&key, &self.holder).await {
                    outcome.warnings.push(Warning::lock_release(format!(
                        "failed to release lock on {key}: {e}"
                    )));
                }
                outcome
            }
        };

        if let Some(audit) = &self.audit {
            match audit.record(&outcome, &self.metadata).await {
                Ok(reference) => outcome.audit_ref = Some(reference),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "audit record not written");
                    outcome.warnings.push(Warning::audit_missing(format!(
                        "audit record for {key} not written: {e}"
                    )));
                }
            }
        }

        tracing::info!(
            key = %key,
            status = %outcome.status,
            duration = ?outcome.duration,
            "unit finished"
        );
        outcome
    }

    async fn drive(&self, unit: DeploymentUnit, action: Action) -> ExecutionOutcome {
        let tool = &*self.tool;
        let tool_settings = &self.settings.tool;

        let run = UnitRun::new(unit, action);
        let locked = match run
            .acquire_lock(&self.locks, &self.holder, self.settings.lock_ttl)
            .await
        {
            Ok(locked) => locked,
            Err((run, err)) => return run.finish(UnitStatus::SkippedLocked, Some(&err)),
        };

        let locked = if self.settings.detect_legacy_shards {
            match locked.check_legacy(&self.migrator).await {
                Ok(locked) => locked,
                Err((locked, err)) => {
                    return locked
                        .release(&self.locks)
                        .await
                        .finish(UnitStatus::PendingMigration, Some(&err));
                }
            }
        } else {
            locked
        };

        if !action.is_mutating() {
            return match locked.run_read_only(tool, tool_settings).await {
                Ok(executed) => executed
                    .release(&self.locks)
                    .await
                    .finish(UnitStatus::Succeeded, None),
                Err((locked, err)) => locked
                    .release(&self.locks)
                    .await
                    .finish(UnitStatus::Failed, Some(&err)),
            };
        }

        let gated = match locked.check_policy(tool, &*self.policy, tool_settings).await {
            Ok(gated) => gated,
            Err((locked, err)) => {
                // Nothing was mutated yet, so a failed plan needs no rollback.
                let status = if err.kind() == DeployErrorKind::ToolExecution {
                    UnitStatus::Failed
                } else {
                    UnitStatus::PolicyRejected
                };
                return locked
                    .release(&self.locks)
                    .await
                    .finish(status, Some(&err));
            }
        };

        let guarded = match gated.back_up(&self.backups).await {
            Ok(guarded) => guarded,
            Err((gated, err)) => {
                return gated
                    .release(&self.locks)
                    .await
                    .finish(UnitStatus::BackupFailed, Some(&err));
            }
        };

        match guarded.run_mutation(tool, tool_settings).await {
            Ok(executed) => executed
                .release(&self.locks)
                .await
                .finish(UnitStatus::Succeeded, None),
            Err((faulted, err)) => {
                let recovered = faulted.roll_back(&self.backups).await;
                let status = recovered.status();
                let err = if status == UnitStatus::RollbackFailed {
                    DeployError::rollback(
                        recovered.shard_key().as_str(),
                        format!("{err}; restoring the backup also failed"),
                    )
                } else {
                    err
                };
                recovered
                    .release(&self.locks)
                    .await
                    .finish(status, Some(&err))
            }
        }
    }
}
