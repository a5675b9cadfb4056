// ABOUTME: Copy-on-write backup and rollback of shard state snapshots.
// ABOUTME: Every mutation is preceded by a server-side encrypted copy that can be restored.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::shard::ShardKey;
use crate::store::{Encryption, ObjectMeta, ObjectStore, PutOptions, WriteResult, bounded};
use crate::types::BackupId;

use super::DeployError;
use super::lock::DEFAULT_STORE_TIMEOUT;

/// Root prefix for backup snapshots.
pub const BACKUP_PREFIX: &str = "backups";

const SNAPSHOT_EXT: &str = ".state";
const RECORD_EXT: &str = ".json";

/// A point-in-time copy of one shard's state taken before a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub shard_key: ShardKey,
    pub backup_location: String,
    pub created_at: DateTime<Utc>,
    pub unit_name: String,
    /// Store version of the snapshot that was copied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
}

impl BackupRecord {
    /// Key of the JSON record stored next to the snapshot copy.
    fn record_location(&self) -> String {
        let stem = self
            .backup_location
            .strip_suffix(SNAPSHOT_EXT)
            .unwrap_or(&self.backup_location);
        format!("{stem}{RECORD_EXT}")
    }
}

/// Result of backing up a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(BackupRecord),
    /// The shard held no snapshot yet; nothing was copied.
    NoPriorState,
}

impl BackupOutcome {
    pub fn record(&self) -> Option<&BackupRecord> {
        match self {
            BackupOutcome::Created(record) => Some(record),
            BackupOutcome::NoPriorState => None,
        }
    }
}

/// Outcome of a manual restore from the store's version history.
#[derive(Debug, Clone)]
pub struct Restored {
    /// Backup of the state that the restore replaced.
    pub previous: BackupOutcome,
    pub meta: ObjectMeta,
}

/// Creates backups, rolls shards back, and serves operator restores.
#[derive(Clone)]
pub struct BackupManager {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Directory holding all backups of one shard.
pub fn backup_dir(key: &ShardKey) -> String {
    format!("{}/{}/", BACKUP_PREFIX, key.stem())
}

impl BackupManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Copy the shard's current snapshot aside before it is mutated.
    ///
    /// Completes before the caller starts any mutating tool invocation.
    pub async fn backup(
        &self,
        key: &ShardKey,
        unit_name: &str,
    ) -> Result<BackupOutcome, DeployError> {
        let head = bounded(key.as_str(), self.timeout, self.store.head(key.as_str()))
            .await
            .map_err(|e| DeployError::backup(key.as_str(), e))?;
        let Some(current) = head else {
            tracing::debug!(key = %key, "no prior state, nothing to back up");
            return Ok(BackupOutcome::NoPriorState);
        };

        let id = BackupId::generate();
        let created_at = Utc::now();
        let backup_location = format!(
            "{}{}-{}{}",
            backup_dir(key),
            created_at.format("%Y%m%dT%H%M%S%.3fZ"),
            id,
            SNAPSHOT_EXT
        );

        bounded(
            &backup_location,
            self.timeout,
            self.store
                .copy(key.as_str(), &backup_location, Encryption::ServerSide),
        )
        .await
        .map_err(|e| DeployError::backup(key.as_str(), e))?;

        let record = BackupRecord {
            id,
            shard_key: key.clone(),
            backup_location,
            created_at,
            unit_name: unit_name.to_string(),
            source_version: Some(current.version),
        };
        self.write_record(&record).await?;

        tracing::debug!(key = %key, location = %record.backup_location, "backed up shard state");
        Ok(BackupOutcome::Created(record))
    }

    async fn write_record(&self, record: &BackupRecord) -> Result<(), DeployError> {
        let key = record.shard_key.as_str();
        let location = record.record_location();
        let payload = serde_json::to_vec_pretty(record)
            .map_err(|e| DeployError::backup(key, format!("failed to encode record: {e}")))?;

        let written = bounded(
            &location,
            self.timeout,
            self.store
                .put(&location, Bytes::from(payload), PutOptions::encrypted_create()),
        )
        .await
        .map_err(|e| DeployError::backup(key, e))?;

        match written {
            WriteResult::Written(_) => Ok(()),
            WriteResult::PreconditionFailed => Err(DeployError::backup(
                key,
                format!("backup record {location} already exists"),
            )),
        }
    }

    /// Copy the backup back over the shard key. Safe to repeat.
    ///
    /// Never fails loudly: problems are logged and reported as `false`.
    pub async fn rollback(&self, record: &BackupRecord) -> bool {
        let key = record.shard_key.as_str();
        let restored = bounded(
            key,
            self.timeout,
            self.store
                .copy(&record.backup_location, key, Encryption::ServerSide),
        )
        .await;

        match restored {
            Ok(_) => {
                tracing::info!(key, location = %record.backup_location, "rolled back shard state");
                true
            }
            Err(e) if e.is_not_found() => {
                tracing::error!(
                    key,
                    location = %record.backup_location,
                    "backup snapshot missing, cannot roll back"
                );
                false
            }
            Err(e) => {
                tracing::error!(key, error = %e, "rollback copy failed");
                false
            }
        }
    }

    /// Backup records for a shard, newest first.
    pub async fn list(&self, key: &ShardKey) -> Result<Vec<BackupRecord>, DeployError> {
        let dir = backup_dir(key);
        let objects = bounded(&dir, self.timeout, self.store.list(&dir)).await?;

        let mut records = Vec::new();
        for object in objects {
            let Some(name) = object.key.strip_prefix(&dir) else {
                continue;
            };
            // Resource keys of the same unit nest below this directory.
            if name.contains('/') || !name.ends_with(RECORD_EXT) {
                continue;
            }
            let raw = bounded(&object.key, self.timeout, self.store.get(&object.key)).await?;
            match serde_json::from_slice::<BackupRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %object.key, error = %e, "skipping unreadable backup record"),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Restore a version from the store's own history over the live key.
    ///
    /// The state being replaced is backed up first.
    pub async fn restore_version(
        &self,
        key: &ShardKey,
        version: &str,
        unit_name: &str,
    ) -> Result<Restored, DeployError> {
        let data = bounded(
            key.as_str(),
            self.timeout,
            self.store.get_version(key.as_str(), version),
        )
        .await
        .map_err(|e| {
            if e.is_not_found() {
                DeployError::Validation(format!("{key} has no version {version}"))
            } else {
                e.into()
            }
        })?;

        let previous = self.backup(key, unit_name).await?;

        let written = bounded(
            key.as_str(),
            self.timeout,
            self.store.put(key.as_str(), data, PutOptions::encrypted()),
        )
        .await?;

        match written {
            WriteResult::Written(meta) => {
                tracing::info!(key = %key, version, "restored shard state from version history");
                Ok(Restored { previous, meta })
            }
            WriteResult::PreconditionFailed => Err(DeployError::rollback(
                key.as_str(),
                "unconditional write reported a failed precondition",
            )),
        }
    }
}
