// ABOUTME: Remote object store and atomic store abstractions.
// ABOUTME: All shard state, backups, locks, and audit records go through these traits.

mod error;
mod local;
mod memory;

pub use error::{StoreError, StoreErrorKind, StoreResult};
pub use local::LocalStore;
pub use memory::{MemoryStore, StoreOp};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Encryption requested for a stored object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    #[default]
    None,
    /// Encrypted at rest by the storage service.
    ServerSide,
}

/// Precondition for conditional writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write unconditionally.
    #[default]
    None,
    /// Write only if no object exists at the key.
    DoesNotExist,
}

/// Options for `put` and `copy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    pub precondition: WritePrecondition,
    pub encryption: Encryption,
}

impl PutOptions {
    /// Server-side encrypted unconditional write.
    pub fn encrypted() -> Self {
        Self {
            precondition: WritePrecondition::None,
            encryption: Encryption::ServerSide,
        }
    }

    /// Server-side encrypted write that never overwrites.
    pub fn encrypted_create() -> Self {
        Self {
            precondition: WritePrecondition::DoesNotExist,
            encryption: Encryption::ServerSide,
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    Written(ObjectMeta),
    /// Precondition not met; nothing was written.
    PreconditionFailed,
}

/// Metadata for the latest version of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    /// Opaque version token, monotonically increasing per key.
    pub version: String,
    pub last_modified: DateTime<Utc>,
    pub encryption: Encryption,
}

/// One retained version of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub version: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub is_latest: bool,
}

/// Versioned object storage holding state snapshots, backups, and audit records.
///
/// Every write keeps the previous version so that an operator can recover a
/// point-in-time snapshot without any backup record.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Read the latest version. Returns `StoreError::NotFound` if absent.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Metadata of the latest version, `None` if absent.
    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>>;

    /// Write an object. A failed precondition is a normal result, not an error.
    async fn put(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<WriteResult>;

    /// Copy `src` to `dst` inside the store without downloading it.
    ///
    /// Returns `StoreError::NotFound` if `src` does not exist.
    async fn copy(&self, src: &str, dst: &str, encryption: Encryption)
    -> StoreResult<ObjectMeta>;

    /// Keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>>;

    /// All retained versions of a key, oldest first.
    async fn versions(&self, key: &str) -> StoreResult<Vec<ObjectVersion>>;

    /// Read a specific retained version.
    async fn get_version(&self, key: &str, version: &str) -> StoreResult<Bytes>;
}

/// Atomic key-value store with expiring entries, used for shard locks.
#[async_trait]
pub trait AtomicStore: Send + Sync + 'static {
    /// Insert only if no live entry exists. Returns whether the insert happened.
    ///
    /// Entries disappear once `ttl` has elapsed.
    async fn insert_if_absent(&self, key: &str, value: Bytes, ttl: Duration)
    -> StoreResult<bool>;

    /// Read a live entry.
    async fn read(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Remove an entry. Removing an absent entry succeeds.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Keys of live entries under a prefix, sorted.
    async fn live_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Bound a store call by `timeout`, reporting expiry as `StoreError::Timeout`.
pub async fn bounded<T, F>(key: &str, timeout: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            key: key.to_string(),
            timeout,
        }),
    }
}

/// Reject keys that could escape a backend's namespace.
pub(crate) fn check_key(key: &str) -> StoreResult<()> {
    let reason = if key.is_empty() {
        Some("empty key")
    } else if key.starts_with('/') {
        Some("absolute key")
    } else if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        Some("empty or relative path component")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
