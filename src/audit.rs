// ABOUTME: Immutable audit records of every unit run and migration.
// ABOUTME: Written encrypted to the object store; failures never change a unit's status.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::deploy::{DEFAULT_STORE_TIMEOUT, DeployError, ExecutionOutcome};
use crate::shard::MigrationReport;
use crate::store::{ObjectStore, PutOptions, StoreError, WriteResult, bounded};
use crate::types::{AccountId, CorrelationId, HolderId, ProjectName};

/// Default key prefix for audit records.
pub const DEFAULT_AUDIT_PREFIX: &str = "audit";

/// Format version of the audit document.
pub const AUDIT_SCHEMA_VERSION: u32 = 1;

/// Attempts before giving up on a free key within one millisecond.
const MAX_KEY_ATTEMPTS: u32 = 16;

/// Run-wide context written into every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// What started the run, e.g. a CI pipeline id or `manual`.
    pub trigger: String,
    pub correlation_id: CorrelationId,
    pub holder_id: HolderId,
    pub orchestrator_version: String,
    pub started_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn new(trigger: impl Into<String>, holder_id: HolderId) -> Self {
        Self {
            trigger: trigger.into(),
            correlation_id: CorrelationId::generate(),
            holder_id,
            orchestrator_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Store key of a written audit record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditRef(String);

impl AuditRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuditRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to store audit record: {0}")]
    Store(#[from] StoreError),

    #[error("no free audit key for {0}")]
    KeyExhausted(String),
}

impl From<AuditError> for DeployError {
    fn from(err: AuditError) -> Self {
        DeployError::AuditWrite(err.to_string())
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum AuditBody<'a> {
    Deployment { outcome: &'a ExecutionOutcome },
    Migration { migration: &'a MigrationReport },
}

#[derive(Serialize)]
struct AuditDocument<'a> {
    schema_version: u32,
    recorded_at: DateTime<Utc>,
    metadata: &'a RunMetadata,
    #[serde(flatten)]
    body: AuditBody<'a>,
}

/// Writes audit records.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    timeout: Duration,
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record a unit's full, unredacted outcome.
    pub async fn record(
        &self,
        outcome: &ExecutionOutcome,
        metadata: &RunMetadata,
    ) -> Result<AuditRef, AuditError> {
        let document = AuditDocument {
            schema_version: AUDIT_SCHEMA_VERSION,
            recorded_at: Utc::now(),
            metadata,
            body: AuditBody::Deployment { outcome },
        };
        self.write(
            outcome.unit.account(),
            outcome.unit.project(),
            outcome.action.as_str(),
            metadata,
            &document,
        )
        .await
    }

    /// Record an explicit legacy-shard migration.
    pub async fn record_migration(
        &self,
        report: &MigrationReport,
        metadata: &RunMetadata,
    ) -> Result<AuditRef, AuditError> {
        let document = AuditDocument {
            schema_version: AUDIT_SCHEMA_VERSION,
            recorded_at: Utc::now(),
            metadata,
            body: AuditBody::Migration { migration: report },
        };
        self.write(
            report.unit.account(),
            report.unit.project(),
            "migrate",
            metadata,
            &document,
        )
        .await
    }

    async fn write(
        &self,
        account: &AccountId,
        project: &ProjectName,
        action: &str,
        metadata: &RunMetadata,
        document: &AuditDocument<'_>,
    ) -> Result<AuditRef, AuditError> {
        let payload = Bytes::from(serde_json::to_vec_pretty(document)?);
        let base = format!(
            "{}/{}/{}/{}-{}-{}",
            self.prefix,
            account,
            project,
            action,
            document.recorded_at.format("%Y%m%dT%H%M%S%.3fZ"),
            metadata.correlation_id
        );

        // Units of one run can share account, project, and millisecond.
        for attempt in 0..MAX_KEY_ATTEMPTS {
            let key = if attempt == 0 {
                format!("{base}.json")
            } else {
                format!("{base}-{attempt}.json")
            };
            let written = bounded(
                &key,
                self.timeout,
                self.store
                    .put(&key, payload.clone(), PutOptions::encrypted_create()),
            )
            .await?;
            if let WriteResult::Written(_) = written {
                tracing::debug!(key = %key, "wrote audit record");
                return Ok(AuditRef(key));
            }
        }
        Err(AuditError::KeyExhausted(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::UnitStatus;
    use crate::store::MemoryStore;
    use crate::types::{Action, DeploymentUnit, Region};

    fn outcome() -> ExecutionOutcome {
        let unit = DeploymentUnit::new(
            AccountId::new("123456789012").unwrap(),
            Region::new("us-east-1").unwrap(),
            ProjectName::new("payments").unwrap(),
            [],
            "main.tf",
        );
        let mut outcome =
            ExecutionOutcome::not_started(unit, Action::Apply, UnitStatus::Succeeded, None);
        outcome.raw_output = "password=hunter2".to_string();
        outcome
    }

    #[tokio::test]
    async fn record_writes_unredacted_outcome_under_account_and_project() {
        let store = MemoryStore::new();
        let recorder = AuditRecorder::new(Arc::new(store.clone()), "audit");
        let metadata = RunMetadata::new("ci-42", HolderId::new("runner"));

        let audit_ref = recorder.record(&outcome(), &metadata).await.unwrap();

        assert!(audit_ref.as_str().starts_with("audit/123456789012/payments/apply-"));
        assert!(audit_ref.as_str().ends_with(&format!("{}.json", metadata.correlation_id)));
        let body = store.snapshot(audit_ref.as_str()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "deployment");
        assert_eq!(json["metadata"]["trigger"], "ci-42");
        assert_eq!(json["outcome"]["raw_output"], "password=hunter2");
    }

    #[tokio::test]
    async fn colliding_records_get_distinct_keys() {
        let store = MemoryStore::new();
        let recorder = AuditRecorder::new(Arc::new(store.clone()), "audit");
        let metadata = RunMetadata::new("ci", HolderId::new("runner"));
        let outcome = outcome();

        let a = recorder.record(&outcome, &metadata).await.unwrap();
        let b = recorder.record(&outcome, &metadata).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn store_failure_is_an_audit_error() {
        let store = MemoryStore::new();
        store.inject_failure("audit/");
        let recorder = AuditRecorder::new(Arc::new(store), "audit");
        let metadata = RunMetadata::new("ci", HolderId::new("runner"));

        let err = recorder.record(&outcome(), &metadata).await.unwrap_err();
        assert!(matches!(err, AuditError::Store(_)));
    }
}
