// ABOUTME: Shard lock manager guarding each shard key against concurrent mutation.
// ABOUTME: A single atomic insert-if-absent with TTL; never blocks, fails closed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::shard::ShardKey;
use crate::store::{AtomicStore, bounded};
use crate::types::HolderId;

use super::DeployError;

/// Default lock lifetime. Long enough for a slow store round trip,
/// short enough that a crashed run frees the shard quickly.
///
/// Shorter than the default tool timeout: a mutation running past the TTL
/// no longer excludes other runs. `Config::warnings` reports this pairing.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// Default bound on a single lock store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Live lock record stored under the shard key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The shard key this record locks.
    pub lock_id: ShardKey,
    pub holder_id: HolderId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(key: &ShardKey, holder: &HolderId, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(5));
        Self {
            lock_id: key.clone(),
            holder_id: holder.clone(),
            acquired_at,
            expires_at: acquired_at + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time left before the record stops blocking acquisition.
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Result of a single acquisition attempt.
#[derive(Debug, Clone)]
pub enum LockAcquisition {
    Acquired(LockRecord),
    /// A live record exists. `holder` is `None` if it vanished before it could be read.
    Held { holder: Option<LockRecord> },
    /// The lock backend could not be reached. Treated the same as held.
    Unavailable { cause: String },
}

impl LockAcquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquisition::Acquired(_))
    }

    /// Conflict error for a refused acquisition, `None` if acquired.
    pub fn into_conflict(self, key: &ShardKey) -> Option<DeployError> {
        match self {
            LockAcquisition::Acquired(_) => None,
            LockAcquisition::Held { holder } => Some(DeployError::lock_conflict(
                key.as_str(),
                holder
                    .map(|r| r.holder_id.into_inner())
                    .unwrap_or_else(|| "unknown holder".to_string()),
            )),
            LockAcquisition::Unavailable { cause } => Some(DeployError::lock_conflict(
                key.as_str(),
                format!("unknown (lock store unavailable: {cause})"),
            )),
        }
    }
}

/// Acquires, releases, and inspects shard locks.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn AtomicStore>,
    timeout: Duration,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LockManager {
    pub fn new(store: Arc<dyn AtomicStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound every store call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Try once to take the lock for `key`. Never waits for a holder to finish.
    pub async fn acquire(
        &self,
        key: &ShardKey,
        holder: &HolderId,
        ttl: Duration,
    ) -> LockAcquisition {
        let record = LockRecord::new(key, holder, ttl);
        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                return LockAcquisition::Unavailable {
                    cause: format!("failed to serialize lock record: {e}"),
                };
            }
        };

        let inserted = bounded(
            key.as_str(),
            self.timeout,
            self.store.insert_if_absent(key.as_str(), payload, ttl),
        )
        .await;

        match inserted {
            Ok(true) => {
                tracing::debug!(key = %key, holder = %holder, "acquired shard lock");
                LockAcquisition::Acquired(record)
            }
            Ok(false) => {
                let holder = self.inspect(key).await.ok().flatten();
                tracing::debug!(
                    key = %key,
                    holder = ?holder.as_ref().map(|r| r.holder_id.as_str()),
                    "shard lock held"
                );
                LockAcquisition::Held { holder }
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "lock store unavailable, refusing lock");
                LockAcquisition::Unavailable {
                    cause: e.to_string(),
                }
            }
        }
    }

    /// Release the lock if `holder` still owns it. Releasing an absent lock succeeds.
    ///
    /// A record owned by someone else (ours expired and was taken over) is left alone.
    pub async fn release(&self, key: &ShardKey, holder: &HolderId) -> Result<(), DeployError> {
        match self.inspect(key).await? {
            None => Ok(()),
            Some(record) if record.holder_id == *holder => self.remove(key).await,
            Some(record) => {
                tracing::warn!(
                    key = %key,
                    owner = %record.holder_id,
                    "lock expired and was taken over, not releasing"
                );
                Ok(())
            }
        }
    }

    /// Operator recovery: remove the lock regardless of holder.
    pub async fn force_release(&self, key: &ShardKey) -> Result<Option<LockRecord>, DeployError> {
        let previous = self.inspect(key).await?;
        self.remove(key).await?;
        if let Some(record) = &previous {
            tracing::warn!(key = %key, holder = %record.holder_id, "force-released shard lock");
        }
        Ok(previous)
    }

    /// The live lock record for `key`, if any.
    pub async fn inspect(&self, key: &ShardKey) -> Result<Option<LockRecord>, DeployError> {
        let raw = bounded(key.as_str(), self.timeout, self.store.read(key.as_str())).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_slice::<LockRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "unreadable lock record");
                Ok(Some(LockRecord {
                    lock_id: key.clone(),
                    holder_id: HolderId::new("unreadable"),
                    acquired_at: DateTime::<Utc>::MIN_UTC,
                    expires_at: DateTime::<Utc>::MAX_UTC,
                }))
            }
        }
    }

    /// Every live lock under `prefix`, for operator status.
    pub async fn list(&self, prefix: &str) -> Result<Vec<LockRecord>, DeployError> {
        let keys = bounded(prefix, self.timeout, self.store.live_keys(prefix)).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Ok(key) = ShardKey::parse(&key) else {
                continue;
            };
            if let Some(record) = self.inspect(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn remove(&self, key: &ShardKey) -> Result<(), DeployError> {
        bounded(key.as_str(), self.timeout, self.store.remove(key.as_str())).await?;
        tracing::debug!(key = %key, "released shard lock");
        Ok(())
    }
}
