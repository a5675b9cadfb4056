// ABOUTME: Backup listing and point-in-time restore.
// ABOUTME: Recovery path for shards whose automatic rollback failed.

use serde::Serialize;

use super::workspace::Workspace;
use stateward::deploy::{BackupRecord, DEFAULT_LOCK_TTL, DeployError, LockAcquisition};
use stateward::error::Result;
use stateward::output::{Output, OutputMode};
use stateward::shard::ShardKey;
use stateward::store::{ObjectStore, ObjectVersion};

#[derive(Serialize)]
struct BackupListing {
    shard_key: ShardKey,
    backups: Vec<BackupRecord>,
    versions: Vec<ObjectVersion>,
}

pub async fn backups(workspace: Workspace, key: &str, output: Output) -> Result<()> {
    let key = ShardKey::parse(key)?;
    let backups = workspace.backups().list(&key).await?;
    let versions = workspace.store.versions(key.as_str()).await?;
    let listing = BackupListing {
        shard_key: key,
        backups,
        versions,
    };

    match output.mode() {
        OutputMode::Json => output.json(&listing),
        OutputMode::Quiet | OutputMode::Normal => {
            output.progress(&format!("Backups of {}:", listing.shard_key));
            for record in &listing.backups {
                println!(
                    "  {}  {}  {}",
                    record.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    record.id,
                    record.backup_location
                );
            }
            output.progress("Versions:");
            for version in &listing.versions {
                println!(
                    "  {}  {}  {} bytes{}",
                    version.version,
                    version.last_modified.format("%Y-%m-%dT%H:%M:%SZ"),
                    version.size,
                    if version.is_latest { "  (latest)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

/// Restore `version` over the live state while holding the shard lock.
pub async fn restore(workspace: Workspace, key: &str, version: &str, output: Output) -> Result<()> {
    let key = ShardKey::parse(key)?;
    let locks = workspace.locks();

    let lock = match locks.acquire(&key, &workspace.holder, DEFAULT_LOCK_TTL).await {
        LockAcquisition::Acquired(lock) => lock,
        refused => {
            let err = refused
                .into_conflict(&key)
                .unwrap_or_else(|| DeployError::lock_conflict(key.as_str(), "unknown"));
            return Err(err.into());
        }
    };

    let restored = workspace
        .backups()
        .restore_version(&key, version, key.stem())
        .await;

    if let Err(e) = locks.release(&key, &lock.holder_id).await {
        output.warning(&format!("failed to release lock on {key}: {e}"));
    }

    let restored = restored?;
    if let Some(previous) = restored.previous.record() {
        output.progress(&format!(
            "Previous state backed up to {}",
            previous.backup_location
        ));
    }
    output.success(&format!(
        "Restored {key} to version {version} (now version {})",
        restored.meta.version
    ));
    Ok(())
}
