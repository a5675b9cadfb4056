// ABOUTME: Filesystem-backed store for single-host runs and local CI.
// ABOUTME: Keeps every object version on disk and uses exclusive file creation for leases.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::IoSnafu;
use super::{
    AtomicStore, Encryption, ObjectMeta, ObjectStore, ObjectVersion, PutOptions, StoreError,
    StoreResult, WritePrecondition, WriteResult, check_key,
};

const OBJECTS_DIR: &str = "objects";
const VERSIONS_DIR: &str = "versions";
const LEASES_DIR: &str = "leases";
const TMP_DIR: &str = "tmp";
const META_SUFFIX: &str = ".meta.json";
const LEASE_SUFFIX: &str = ".lease";

/// Sidecar metadata written next to every object.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    version: u64,
    size: u64,
    last_modified: DateTime<Utc>,
    encryption: Encryption,
}

/// Lease file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseFile {
    expires_at: DateTime<Utc>,
    value: String,
}

impl LeaseFile {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Directory-backed store.
///
/// Layout under `root`:
/// - `objects/<key>` latest content, `objects/<key>.meta.json` its metadata
/// - `versions/<key>/<n>` every version ever written
/// - `leases/<key>.lease` live lock leases
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(format!("{key}{META_SUFFIX}"))
    }

    fn version_path(&self, key: &str, version: u64) -> PathBuf {
        self.root
            .join(VERSIONS_DIR)
            .join(key)
            .join(version.to_string())
    }

    fn lease_path(&self, key: &str) -> PathBuf {
        self.root.join(LEASES_DIR).join(format!("{key}{LEASE_SUFFIX}"))
    }

    fn tmp_path(&self) -> PathBuf {
        self.root
            .join(TMP_DIR)
            .join(uuid::Uuid::new_v4().simple().to_string())
    }

    async fn read_sidecar(&self, key: &str) -> StoreResult<Option<Sidecar>> {
        let path = self.meta_path(key);
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(IoSnafu { key }),
        }
    }

    /// Write `data` to a temp file and return its path.
    async fn stage(&self, key: &str, data: &[u8]) -> StoreResult<PathBuf> {
        let tmp = self.tmp_path();
        ensure_parent(&tmp, key).await?;
        tokio::fs::write(&tmp, data).await.context(IoSnafu { key })?;
        Ok(tmp)
    }

    async fn write_object(
        &self,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> StoreResult<WriteResult> {
        check_key(key)?;
        let target = self.object_path(key);
        ensure_parent(&target, key).await?;

        let staged = self.stage(key, &data).await?;
        match options.precondition {
            WritePrecondition::DoesNotExist => {
                // hard_link refuses to replace an existing file.
                let linked = tokio::fs::hard_link(&staged, &target).await;
                let _ = tokio::fs::remove_file(&staged).await;
                match linked {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        return Ok(WriteResult::PreconditionFailed);
                    }
                    Err(e) => return Err(e).context(IoSnafu { key }),
                }
            }
            WritePrecondition::None => {
                tokio::fs::rename(&staged, &target)
                    .await
                    .context(IoSnafu { key })?;
            }
        }

        let previous = self.read_sidecar(key).await?;
        let sidecar = Sidecar {
            version: previous.map_or(1, |p| p.version + 1),
            size: data.len() as u64,
            last_modified: Utc::now(),
            encryption: options.encryption,
        };

        let version_path = self.version_path(key, sidecar.version);
        ensure_parent(&version_path, key).await?;
        tokio::fs::write(&version_path, &data)
            .await
            .context(IoSnafu { key })?;

        let raw = serde_json::to_vec_pretty(&sidecar).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let staged_meta = self.stage(key, &raw).await?;
        tokio::fs::rename(&staged_meta, self.meta_path(key))
            .await
            .context(IoSnafu { key })?;

        Ok(WriteResult::Written(to_meta(key, &sidecar)))
    }

    async fn read_lease(&self, key: &str) -> StoreResult<Option<LeaseFile>> {
        read_lease_at(&self.lease_path(key), key).await
    }
}

async fn read_lease_at(path: &Path, key: &str) -> StoreResult<Option<LeaseFile>> {
    match tokio::fs::read(path).await {
        Ok(raw) => match serde_json::from_slice::<LeaseFile>(&raw) {
            Ok(lease) => Ok(Some(lease)),
            // A half-written or foreign file is treated as already expired.
            Err(_) => Ok(Some(LeaseFile {
                expires_at: DateTime::<Utc>::MIN_UTC,
                value: String::new(),
            })),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(IoSnafu { key }),
    }
}

async fn ensure_parent(path: &Path, key: &str) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context(IoSnafu { key })?;
    }
    Ok(())
}

fn to_meta(key: &str, sidecar: &Sidecar) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        size: sidecar.size,
        version: sidecar.version.to_string(),
        last_modified: sidecar.last_modified,
        encryption: sidecar.encryption,
    }
}

/// Recursively collect file paths relative to `base`.
fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(base, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        check_key(key)?;
        match tokio::fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e).context(IoSnafu { key }),
        }
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        check_key(key)?;
        if !tokio::fs::try_exists(self.object_path(key))
            .await
            .context(IoSnafu { key })?
        {
            return Ok(None);
        }
        Ok(self.read_sidecar(key).await?.map(|s| to_meta(key, &s)))
    }

    async fn put(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<WriteResult> {
        self.write_object(key, data, options).await
    }

    async fn copy(
        &self,
        src: &str,
        dst: &str,
        encryption: Encryption,
    ) -> StoreResult<ObjectMeta> {
        let data = self.get(src).await?;
        let options = PutOptions {
            precondition: WritePrecondition::None,
            encryption,
        };
        match self.write_object(dst, data, options).await? {
            WriteResult::Written(meta) => Ok(meta),
            WriteResult::PreconditionFailed => Err(StoreError::Backend {
                key: dst.to_string(),
                message: "unconditional copy reported a failed precondition".to_string(),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let base = self.root.join(OBJECTS_DIR);
        let mut files = Vec::new();
        let walk_base = base.clone();
        let files = tokio::task::spawn_blocking(move || {
            walk(&walk_base, &walk_base, &mut files).map(|_| files)
        })
        .await
        .map_err(|e| StoreError::Backend {
            key: prefix.to_string(),
            message: e.to_string(),
        })?
        .context(IoSnafu { key: prefix })?;

        let mut keys: Vec<String> = files
            .into_iter()
            .filter(|f| !f.ends_with(META_SUFFIX) && f.starts_with(prefix))
            .collect();
        keys.sort();

        let mut metas = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(sidecar) = self.read_sidecar(&key).await? {
                metas.push(to_meta(&key, &sidecar));
            }
        }
        Ok(metas)
    }

    async fn versions(&self, key: &str) -> StoreResult<Vec<ObjectVersion>> {
        check_key(key)?;
        let dir = self.root.join(VERSIONS_DIR).join(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(e).context(IoSnafu { key }),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu { key })? {
            let Some(number) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            else {
                continue;
            };
            let metadata = entry.metadata().await.context(IoSnafu { key })?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            versions.push((number, metadata.len(), modified));
        }
        versions.sort_by_key(|(number, _, _)| *number);

        let latest = versions.last().map(|(number, _, _)| *number);
        Ok(versions
            .into_iter()
            .map(|(number, size, last_modified)| ObjectVersion {
                version: number.to_string(),
                size,
                last_modified,
                is_latest: Some(number) == latest,
            })
            .collect())
    }

    async fn get_version(&self, key: &str, version: &str) -> StoreResult<Bytes> {
        check_key(key)?;
        let number: u64 = version.parse().map_err(|_| StoreError::NotFound {
            key: format!("{key}@{version}"),
        })?;
        match tokio::fs::read(self.version_path(key, number)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                key: format!("{key}@{version}"),
            }),
            Err(e) => Err(e).context(IoSnafu { key }),
        }
    }
}

#[async_trait]
impl AtomicStore for LocalStore {
    async fn insert_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> StoreResult<bool> {
        check_key(key)?;
        let path = self.lease_path(key);
        ensure_parent(&path, key).await?;

        let lease = LeaseFile {
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(5)),
            value: String::from_utf8_lossy(&value).into_owned(),
        };
        let raw = serde_json::to_vec(&lease).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let staged = self.stage(key, &raw).await?;

        // Two attempts: the second one runs after clearing an expired lease.
        let mut acquired = false;
        for _ in 0..2 {
            match tokio::fs::hard_link(&staged, &path).await {
                Ok(()) => {
                    acquired = true;
                    break;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !self.clear_expired(key, &path).await? {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&staged).await;
                    return Err(e).context(IoSnafu { key });
                }
            }
        }

        let _ = tokio::fs::remove_file(&staged).await;
        Ok(acquired)
    }

    async fn read(&self, key: &str) -> StoreResult<Option<Bytes>> {
        check_key(key)?;
        Ok(self
            .read_lease(key)
            .await?
            .filter(|lease| !lease.is_expired())
            .map(|lease| Bytes::from(lease.value)))
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        check_key(key)?;
        match tokio::fs::remove_file(self.lease_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(IoSnafu { key }),
        }
    }

    async fn live_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let base = self.root.join(LEASES_DIR);
        let mut files = Vec::new();
        let walk_base = base.clone();
        let files = tokio::task::spawn_blocking(move || {
            walk(&walk_base, &walk_base, &mut files).map(|_| files)
        })
        .await
        .map_err(|e| StoreError::Backend {
            key: prefix.to_string(),
            message: e.to_string(),
        })?
        .context(IoSnafu { key: prefix })?;

        let mut keys = Vec::new();
        for file in files {
            let Some(key) = file.strip_suffix(LEASE_SUFFIX) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(lease) = self.read_lease(key).await?
                && !lease.is_expired()
            {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl LocalStore {
    /// Move an expired lease out of the way. Returns whether the path is now free.
    ///
    /// The lease is renamed to a unique tombstone first so that two processes
    /// racing to clear the same lease can't both delete a fresh one.
    async fn clear_expired(&self, key: &str, path: &Path) -> StoreResult<bool> {
        match self.read_lease(key).await? {
            None => return Ok(true),
            Some(lease) if !lease.is_expired() => return Ok(false),
            Some(_) => {}
        }

        let tombstone = self.tmp_path();
        ensure_parent(&tombstone, key).await?;
        match tokio::fs::rename(path, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e).context(IoSnafu { key }),
        }

        // Someone may have replaced the lease between our read and the rename.
        let moved = read_lease_at(&tombstone, key).await?;
        if let Some(lease) = moved
            && !lease.is_expired()
        {
            reinstate_lease(&tombstone, path).await;
            return Ok(false);
        }

        let _ = tokio::fs::remove_file(&tombstone).await;
        Ok(true)
    }
}

/// Put a live lease that was moved aside back at `path`.
///
/// If another lease took `path` in the meantime the moved one is kept in the
/// tmp area and the conflict is logged; it is never deleted.
async fn reinstate_lease(tombstone: &Path, path: &Path) -> bool {
    match tokio::fs::hard_link(tombstone, path).await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(tombstone).await;
            true
        }
        Err(e) => {
            tracing::warn!(
                lease = %path.display(),
                kept_at = %tombstone.display(),
                error = %e,
                "live lease could not be reinstated"
            );
            false
        }
    }
}
