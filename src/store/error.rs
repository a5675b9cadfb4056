// ABOUTME: Storage error types with SNAFU context selectors.
// ABOUTME: Distinguishes missing objects, backend failures, I/O, corruption, and timeouts.

use crate::iac::format_elapsed;
use snafu::Snafu;
use std::time::Duration;

/// Errors from the object store and atomic store backends.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("object not found: {key}"))]
    NotFound { key: String },

    #[snafu(display("storage backend error at {key}: {message}"))]
    Backend { key: String, message: String },

    #[snafu(display("I/O error at {key}: {source}"))]
    Io { key: String, source: std::io::Error },

    #[snafu(display("corrupt record at {key}: {message}"))]
    Corrupt { key: String, message: String },

    #[snafu(display("invalid storage key '{key}': {reason}"))]
    InvalidKey { key: String, reason: &'static str },

    #[snafu(display("storage call for {key} timed out after {}", format_elapsed(*timeout)))]
    Timeout { key: String, timeout: Duration },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    Backend,
    Timeout,
    InvalidKey,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound { .. } => StoreErrorKind::NotFound,
            StoreError::Backend { .. } | StoreError::Io { .. } | StoreError::Corrupt { .. } => {
                StoreErrorKind::Backend
            }
            StoreError::InvalidKey { .. } => StoreErrorKind::InvalidKey,
            StoreError::Timeout { .. } => StoreErrorKind::Timeout,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == StoreErrorKind::NotFound
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
