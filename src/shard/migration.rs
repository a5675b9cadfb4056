// ABOUTME: Detection and explicit migration of state stored under legacy shard keys.
// ABOUTME: Locks, backs up, merges, writes encrypted, verifies, and audits; never deletes legacy state.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditRecorder, AuditRef, RunMetadata};
use crate::deploy::{
    BackupManager, BackupRecord, DEFAULT_STORE_TIMEOUT, DeployError, LockManager, LockRecord,
};
use crate::diagnostics::{Diagnostics, Warning};
use crate::store::{ObjectMeta, ObjectStore, PutOptions, WriteResult, bounded};
use crate::types::{DeploymentUnit, HolderId};

use super::ShardKey;

/// A legacy key that currently holds state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacySnapshot {
    pub key: ShardKey,
    pub meta: ObjectMeta,
}

/// What the store holds for a unit's current and legacy keys.
#[derive(Debug, Clone)]
pub struct LegacyDetection {
    pub current: ShardKey,
    pub current_has_state: bool,
    pub legacy: Vec<LegacySnapshot>,
}

impl LegacyDetection {
    /// The current key is empty while a legacy key holds state.
    pub fn is_pending(&self) -> bool {
        !self.current_has_state && !self.legacy.is_empty()
    }
}

/// A legacy snapshot loaded for merging.
#[derive(Debug, Clone)]
pub struct LegacyState {
    pub key: ShardKey,
    pub meta: ObjectMeta,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("no legacy state to merge")]
    Empty,

    #[error("{} legacy snapshots found ({}); choose a merge policy", keys.len(), keys.join(", "))]
    Ambiguous { keys: Vec<String> },
}

/// Business policy combining legacy snapshots into one.
pub trait StateMerger: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce the snapshot to store under the new key.
    fn merge(&self, sources: &[LegacyState]) -> Result<Bytes, MergeError>;
}

/// Copy a single legacy snapshot verbatim; refuse when there is more than one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefuseAmbiguous;

impl StateMerger for RefuseAmbiguous {
    fn name(&self) -> &'static str {
        "refuse-ambiguous"
    }

    fn merge(&self, sources: &[LegacyState]) -> Result<Bytes, MergeError> {
        match sources {
            [] => Err(MergeError::Empty),
            [only] => Ok(only.data.clone()),
            many => Err(MergeError::Ambiguous {
                keys: many.iter().map(|s| s.key.to_string()).collect(),
            }),
        }
    }
}

/// Take the most recently modified legacy snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestWins;

impl StateMerger for NewestWins {
    fn name(&self) -> &'static str {
        "newest-wins"
    }

    fn merge(&self, sources: &[LegacyState]) -> Result<Bytes, MergeError> {
        sources
            .iter()
            .max_by_key(|s| s.meta.last_modified)
            .map(|s| s.data.clone())
            .ok_or(MergeError::Empty)
    }
}

/// Merge policy selectable on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MergePolicy {
    #[default]
    Refuse,
    Newest,
}

impl MergePolicy {
    pub fn merger(self) -> Box<dyn StateMerger> {
        match self {
            MergePolicy::Refuse => Box::new(RefuseAmbiguous),
            MergePolicy::Newest => Box::new(NewestWins),
        }
    }
}

/// Caller identity for a migration.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    pub holder: HolderId,
    pub lock_ttl: Duration,
    pub metadata: RunMetadata,
}

/// Audit-ready description of a completed migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub unit: DeploymentUnit,
    pub target: ShardKey,
    pub sources: Vec<LegacySnapshot>,
    pub merger: String,
    pub backups: Vec<BackupRecord>,
    pub bytes_written: u64,
    pub target_version: String,
    pub migrated_at: DateTime<Utc>,
}

/// Completed migration plus non-fatal problems.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub report: MigrationReport,
    pub audit_ref: Option<AuditRef>,
    pub warnings: Vec<Warning>,
}

/// Detects and migrates legacy shards.
#[derive(Clone)]
pub struct Migrator {
    store: Arc<dyn ObjectStore>,
    locks: LockManager,
    backups: BackupManager,
    audit: Option<AuditRecorder>,
    timeout: Duration,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("timeout", &self.timeout)
            .field("audit", &self.audit.is_some())
            .finish()
    }
}

impl Migrator {
    pub fn new(store: Arc<dyn ObjectStore>, locks: LockManager, backups: BackupManager) -> Self {
        Self {
            store,
            locks,
            backups,
            audit: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_audit(mut self, audit: AuditRecorder) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Which of the unit's current and legacy keys hold state. Read-only.
    pub async fn detect(&self, unit: &DeploymentUnit) -> Result<LegacyDetection, DeployError> {
        let current = ShardKey::generate(unit);
        let current_has_state = self.head(&current).await?.is_some();

        let mut legacy = Vec::new();
        for key in ShardKey::legacy_candidates(unit) {
            if let Some(meta) = self.head(&key).await? {
                legacy.push(LegacySnapshot { key, meta });
            }
        }

        Ok(LegacyDetection {
            current,
            current_has_state,
            legacy,
        })
    }

    /// Move legacy state to the unit's current key.
    ///
    /// Locks the target and every legacy key, backs up each legacy snapshot,
    /// merges, writes the result encrypted, and reads it back to verify.
    /// Legacy snapshots are left in place.
    pub async fn migrate(
        &self,
        unit: &DeploymentUnit,
        merger: &dyn StateMerger,
        ctx: &MigrationContext,
    ) -> Result<MigrationOutcome, DeployError> {
        let target = ShardKey::generate(unit);
        let mut lock_keys = vec![target.clone()];
        lock_keys.extend(ShardKey::legacy_candidates(unit));
        lock_keys.sort();

        let mut held: Vec<LockRecord> = Vec::with_capacity(lock_keys.len());
        let mut conflict = None;
        for key in &lock_keys {
            let acquisition = self.locks.acquire(key, &ctx.holder, ctx.lock_ttl).await;
            match acquisition {
                crate::deploy::LockAcquisition::Acquired(record) => held.push(record),
                refused => {
                    conflict = refused.into_conflict(key);
                    break;
                }
            }
        }

        let mut diag = Diagnostics::default();
        let result = match conflict {
            Some(err) => Err(err),
            None => self.migrate_locked(unit, &target, merger, ctx).await,
        };

        for record in held {
            if let Err(e) = self.locks.release(&record.lock_id, &ctx.holder).await {
                diag.warn(Warning::lock_release(format!(
                    "failed to release lock on {}: {}",
                    record.lock_id, e
                )));
            }
        }

        let report = result?;
        let mut audit_ref = None;
        if let Some(audit) = &self.audit {
            match audit.record_migration(&report, &ctx.metadata).await {
                Ok(reference) => audit_ref = Some(reference),
                Err(e) => diag.warn(Warning::audit_missing(format!(
                    "audit record for migration to {} not written: {}",
                    report.target, e
                ))),
            }
        }

        Ok(MigrationOutcome {
            report,
            audit_ref,
            warnings: diag.into_warnings(),
        })
    }

    async fn migrate_locked(
        &self,
        unit: &DeploymentUnit,
        target: &ShardKey,
        merger: &dyn StateMerger,
        ctx: &MigrationContext,
    ) -> Result<MigrationReport, DeployError> {
        let detection = self.detect(unit).await?;
        if detection.current_has_state {
            return Err(DeployError::migration(
                target.as_str(),
                "target already holds state, nothing to migrate",
            ));
        }
        if detection.legacy.is_empty() {
            return Err(DeployError::migration(
                target.as_str(),
                "no legacy state found",
            ));
        }

        let unit_name = unit.name();
        let mut backups = Vec::with_capacity(detection.legacy.len());
        let mut sources = Vec::with_capacity(detection.legacy.len());
        for snapshot in &detection.legacy {
            if let Some(record) = self.backups.backup(&snapshot.key, &unit_name).await?.record() {
                backups.push(record.clone());
            }
            let data = bounded(
                snapshot.key.as_str(),
                self.timeout,
                self.store.get(snapshot.key.as_str()),
            )
            .await?;
            sources.push(LegacyState {
                key: snapshot.key.clone(),
                meta: snapshot.meta.clone(),
                data,
            });
        }

        let merged = merger
            .merge(&sources)
            .map_err(|e| DeployError::migration(target.as_str(), e.to_string()))?;

        let written = bounded(
            target.as_str(),
            self.timeout,
            self.store
                .put(target.as_str(), merged.clone(), PutOptions::encrypted_create()),
        )
        .await?;
        let meta = match written {
            WriteResult::Written(meta) => meta,
            WriteResult::PreconditionFailed => {
                return Err(DeployError::migration(
                    target.as_str(),
                    "target was written concurrently",
                ));
            }
        };

        let readback = bounded(target.as_str(), self.timeout, self.store.get(target.as_str())).await?;
        if readback != merged {
            return Err(DeployError::migration(
                target.as_str(),
                "verification failed: stored snapshot differs from merged snapshot",
            ));
        }

        tracing::info!(
            target = %target,
            sources = detection.legacy.len(),
            merger = merger.name(),
            holder = %ctx.holder,
            "migrated legacy shard state"
        );

        Ok(MigrationReport {
            unit: unit.clone(),
            target: target.clone(),
            sources: detection.legacy,
            merger: merger.name().to_string(),
            backups,
            bytes_written: meta.size,
            target_version: meta.version,
            migrated_at: Utc::now(),
        })
    }

    async fn head(&self, key: &ShardKey) -> Result<Option<ObjectMeta>, DeployError> {
        Ok(bounded(key.as_str(), self.timeout, self.store.head(key.as_str())).await?)
    }
}
