// ABOUTME: Error types for the per-unit deployment protocol.
// ABOUTME: Each variant maps to a distinct operator-facing severity.

use crate::store::StoreError;

/// Errors raised while driving a unit through lock, policy, backup, tool, and rollback.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Deployment unit or operator input failed validation.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Another run holds the shard lock, or the lock backend was unreachable.
    #[error("shard {key} is locked by {holder}")]
    LockConflict { key: String, holder: String },

    /// Pre-mutation backup failed; the tool was never started.
    #[error("backup of {key} failed: {message}")]
    Backup { key: String, message: String },

    /// IaC tool exited unsuccessfully, timed out, or could not be spawned.
    #[error("{step} failed: {message}")]
    ToolExecution { step: String, message: String },

    /// State could not be restored after a failed mutation.
    #[error("rollback of {key} failed: {message}")]
    Rollback { key: String, message: String },

    /// Audit record could not be written.
    #[error("audit write failed: {0}")]
    AuditWrite(String),

    /// Policy gate refused the change.
    #[error("policy rejected {key}: {}", violations.join("; "))]
    PolicyRejected {
        key: String,
        violations: Vec<String>,
    },

    /// State lives under a legacy key and must be migrated explicitly.
    #[error("shard {key} has no state but legacy state exists at {}; run `stateward migrate`", legacy.join(", "))]
    MigrationRequired { key: String, legacy: Vec<String> },

    /// Explicit migration failed or was refused.
    #[error("migration to {key} failed: {message}")]
    Migration { key: String, message: String },

    /// Storage call failed outside a more specific step.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    Validation,
    LockConflict,
    Backup,
    ToolExecution,
    Rollback,
    AuditWrite,
    PolicyRejected,
    MigrationRequired,
    Migration,
    Store,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Validation(_) => DeployErrorKind::Validation,
            DeployError::LockConflict { .. } => DeployErrorKind::LockConflict,
            DeployError::Backup { .. } => DeployErrorKind::Backup,
            DeployError::ToolExecution { .. } => DeployErrorKind::ToolExecution,
            DeployError::Rollback { .. } => DeployErrorKind::Rollback,
            DeployError::AuditWrite(_) => DeployErrorKind::AuditWrite,
            DeployError::PolicyRejected { .. } => DeployErrorKind::PolicyRejected,
            DeployError::MigrationRequired { .. } => DeployErrorKind::MigrationRequired,
            DeployError::Migration { .. } => DeployErrorKind::Migration,
            DeployError::Store(_) => DeployErrorKind::Store,
        }
    }

    /// Only a failed rollback leaves state that a human has to repair.
    pub fn requires_operator(&self) -> bool {
        self.kind() == DeployErrorKind::Rollback
    }

    /// A later run may succeed without any change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            DeployErrorKind::LockConflict | DeployErrorKind::Store
        )
    }

    pub fn lock_conflict(key: impl Into<String>, holder: impl Into<String>) -> Self {
        DeployError::LockConflict {
            key: key.into(),
            holder: holder.into(),
        }
    }

    pub fn backup(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        DeployError::Backup {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn tool(step: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::ToolExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn rollback(key: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::Rollback {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn migration(key: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::Migration {
            key: key.into(),
            message: message.into(),
        }
    }
}
