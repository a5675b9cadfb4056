// ABOUTME: Diagnostics accumulator for non-fatal warnings during a run.
// ABOUTME: Collects problems that never change a unit's status but must be shown to users.

use serde::Serialize;

/// Collects non-fatal warnings during orchestration.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn has(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// A non-fatal warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// Shard lock could not be released; it lingers until its TTL expires.
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LockRelease,
            message: message.into(),
        }
    }

    /// Audit record missing; needs compliance follow-up.
    pub fn audit_missing(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::AuditMissing,
            message: message.into(),
        }
    }

    /// Legacy shard detection could not complete.
    pub fn migration_check(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::MigrationCheck,
            message: message.into(),
        }
    }
}

/// Categories of warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    LockRelease,
    AuditMissing,
    MigrationCheck,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::lock_release("lock store timed out"));
        diag.warn(Warning::audit_missing("access denied"));

        assert!(diag.has_warnings());
        assert!(diag.has(WarningKind::AuditMissing));
        assert!(!diag.has(WarningKind::MigrationCheck));
        assert_eq!(diag.into_warnings().len(), 2);
    }

    #[test]
    fn warning_kind_serializes_snake_case() {
        let json = serde_json::to_string(&Warning::audit_missing("x")).unwrap();
        assert!(json.contains("\"audit_missing\""));
    }
}
