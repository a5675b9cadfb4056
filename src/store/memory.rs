// ABOUTME: In-memory versioned store implementing both storage traits.
// ABOUTME: Records every operation and supports failure injection for tests and dry runs.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{
    AtomicStore, Encryption, ObjectMeta, ObjectStore, ObjectVersion, PutOptions, StoreError,
    StoreResult, WritePrecondition, WriteResult, check_key,
};

/// Record of a storage operation for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get { key: String },
    Head { key: String },
    Put { key: String, encryption: Encryption },
    Copy { src: String, dst: String, encryption: Encryption },
    List { prefix: String },
    Insert { key: String },
    Delete { key: String },
}

impl StoreOp {
    /// Whether this operation touched `key` (as source or destination).
    pub fn touches(&self, key: &str) -> bool {
        match self {
            StoreOp::Get { key: k }
            | StoreOp::Head { key: k }
            | StoreOp::Put { key: k, .. }
            | StoreOp::Insert { key: k }
            | StoreOp::Delete { key: k } => k == key,
            StoreOp::Copy { src, dst, .. } => src == key || dst == key,
            StoreOp::List { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredVersion {
    data: Bytes,
    version: u64,
    last_modified: DateTime<Utc>,
    encryption: Encryption,
}

#[derive(Debug, Clone)]
struct Lease {
    value: Bytes,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Vec<StoredVersion>>,
    leases: HashMap<String, Lease>,
    operations: Vec<StoreOp>,
    fail_prefixes: Vec<String>,
}

/// In-memory storage for tests and dry runs.
///
/// Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that sleeps before every call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.inner.lock().operations.clone()
    }

    /// Fail every call whose key starts with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.inner.lock().fail_prefixes.push(prefix.into());
    }

    pub fn clear_failures(&self) {
        self.inner.lock().fail_prefixes.clear();
    }

    /// Latest content of a key, bypassing failure injection and the operation log.
    pub fn snapshot(&self, key: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .objects
            .get(key)
            .and_then(|versions| versions.last())
            .map(|v| v.data.clone())
    }

    /// Seed an object, bypassing failure injection and the operation log.
    pub fn seed(&self, key: &str, data: impl Into<Bytes>) {
        let mut inner = self.inner.lock();
        let versions = inner.objects.entry(key.to_string()).or_default();
        let version = versions.last().map_or(1, |v| v.version + 1);
        versions.push(StoredVersion {
            data: data.into(),
            version,
            last_modified: Utc::now(),
            encryption: Encryption::None,
        });
    }

    /// All keys currently holding an object.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().objects.keys().cloned().collect()
    }

    async fn enter(&self, op: StoreOp, keys: &[&str]) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        for key in keys {
            check_key(key)?;
        }

        let mut inner = self.inner.lock();
        inner.operations.push(op);
        for key in keys {
            if inner.fail_prefixes.iter().any(|p| key.starts_with(p.as_str())) {
                return Err(StoreError::Backend {
                    key: key.to_string(),
                    message: "injected failure".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn meta(key: &str, stored: &StoredVersion) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        size: stored.data.len() as u64,
        version: stored.version.to_string(),
        last_modified: stored.last_modified,
        encryption: stored.encryption,
    }
}

fn not_found(key: &str) -> StoreError {
    StoreError::NotFound {
        key: key.to_string(),
    }
}

impl Inner {
    fn write(&mut self, key: &str, data: Bytes, encryption: Encryption) -> ObjectMeta {
        let versions = self.objects.entry(key.to_string()).or_default();
        let version = versions.last().map_or(1, |v| v.version + 1);
        let stored = StoredVersion {
            data,
            version,
            last_modified: Utc::now(),
            encryption,
        };
        let meta = meta(key, &stored);
        versions.push(stored);
        meta
    }

    fn live_lease(&mut self, key: &str) -> Option<&Lease> {
        let expired = self
            .leases
            .get(key)
            .is_some_and(|lease| lease.expires_at <= Instant::now());
        if expired {
            self.leases.remove(key);
        }
        self.leases.get(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.enter(StoreOp::Get { key: key.into() }, &[key]).await?;
        self.snapshot(key).ok_or_else(|| not_found(key))
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        self.enter(StoreOp::Head { key: key.into() }, &[key]).await?;
        let inner = self.inner.lock();
        Ok(inner
            .objects
            .get(key)
            .and_then(|versions| versions.last())
            .map(|stored| meta(key, stored)))
    }

    async fn put(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<WriteResult> {
        let op = StoreOp::Put {
            key: key.into(),
            encryption: options.encryption,
        };
        self.enter(op, &[key]).await?;

        let mut inner = self.inner.lock();
        if options.precondition == WritePrecondition::DoesNotExist
            && inner.objects.contains_key(key)
        {
            return Ok(WriteResult::PreconditionFailed);
        }
        Ok(WriteResult::Written(inner.write(key, data, options.encryption)))
    }

    async fn copy(
        &self,
        src: &str,
        dst: &str,
        encryption: Encryption,
    ) -> StoreResult<ObjectMeta> {
        let op = StoreOp::Copy {
            src: src.into(),
            dst: dst.into(),
            encryption,
        };
        self.enter(op, &[src, dst]).await?;

        let mut inner = self.inner.lock();
        let data = inner
            .objects
            .get(src)
            .and_then(|versions| versions.last())
            .map(|v| v.data.clone())
            .ok_or_else(|| not_found(src))?;
        Ok(inner.write(dst, data, encryption))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        self.enter(
            StoreOp::List {
                prefix: prefix.into(),
            },
            &[],
        )
        .await?;
        let inner = self.inner.lock();
        Ok(inner
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, versions)| versions.last().map(|v| meta(key, v)))
            .collect())
    }

    async fn versions(&self, key: &str) -> StoreResult<Vec<ObjectVersion>> {
        self.enter(StoreOp::Head { key: key.into() }, &[key]).await?;
        let inner = self.inner.lock();
        let versions = inner.objects.get(key).ok_or_else(|| not_found(key))?;
        let latest = versions.last().map(|v| v.version);
        Ok(versions
            .iter()
            .map(|v| ObjectVersion {
                version: v.version.to_string(),
                size: v.data.len() as u64,
                last_modified: v.last_modified,
                is_latest: Some(v.version) == latest,
            })
            .collect())
    }

    async fn get_version(&self, key: &str, version: &str) -> StoreResult<Bytes> {
        self.enter(StoreOp::Get { key: key.into() }, &[key]).await?;
        let inner = self.inner.lock();
        inner
            .objects
            .get(key)
            .and_then(|versions| versions.iter().find(|v| v.version.to_string() == version))
            .map(|v| v.data.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: format!("{key}@{version}"),
            })
    }
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn insert_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.enter(StoreOp::Insert { key: key.into() }, &[key]).await?;
        let mut inner = self.inner.lock();
        if inner.live_lease(key).is_some() {
            return Ok(false);
        }
        inner.leases.insert(
            key.to_string(),
            Lease {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn read(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.enter(StoreOp::Get { key: key.into() }, &[key]).await?;
        let mut inner = self.inner.lock();
        Ok(inner.live_lease(key).map(|lease| lease.value.clone()))
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.enter(StoreOp::Delete { key: key.into() }, &[key]).await?;
        self.inner.lock().leases.remove(key);
        Ok(())
    }

    async fn live_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.enter(
            StoreOp::List {
                prefix: prefix.into(),
            },
            &[],
        )
        .await?;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.leases.retain(|_, lease| lease.expires_at > now);
        let mut keys: Vec<String> = inner
            .leases
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
