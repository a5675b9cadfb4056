// ABOUTME: Migrate command implementation.
// ABOUTME: Moves state found under legacy shard keys to each unit's current key.

use serde::Serialize;

use super::workspace::Workspace;
use stateward::deploy::DeployError;
use stateward::discovery::UnitFilter;
use stateward::error::Result;
use stateward::output::{Output, OutputMode};
use stateward::report::{EXIT_FAILED, EXIT_SUCCESS};
use stateward::shard::{MergePolicy, MigrationContext, ShardKey};

#[derive(Serialize)]
struct MigrationLine {
    unit: String,
    target: ShardKey,
    legacy: Vec<ShardKey>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Migrate every selected unit with a pending migration. Returns the exit code.
pub async fn migrate(
    workspace: Workspace,
    filter: UnitFilter,
    merge: MergePolicy,
    dry_run: bool,
    mut output: Output,
) -> Result<i32> {
    output.start_timer();
    let units = workspace.units(&filter)?;
    let engine = workspace.engine(workspace.metadata(Some("migrate".to_string()))?)?;
    let migrator = engine.migrator();
    let merger = merge.merger();
    let ctx = MigrationContext {
        holder: workspace.holder.clone(),
        lock_ttl: workspace.config.execution.lock_ttl,
        metadata: engine.metadata().clone(),
    };

    let mut lines = Vec::new();
    let mut failed = false;
    for unit in &units {
        let detection = migrator.detect(unit).await?;
        let legacy: Vec<ShardKey> = detection.legacy.iter().map(|s| s.key.clone()).collect();
        let mut line = MigrationLine {
            unit: unit.name(),
            target: detection.current.clone(),
            legacy,
            status: "up_to_date",
            detail: None,
        };

        if !detection.is_pending() {
            if detection.current_has_state && !detection.legacy.is_empty() {
                line.status = "legacy_ignored";
                line.detail = Some("current key already holds state".to_string());
            }
            lines.push(line);
            continue;
        }

        if dry_run {
            line.status = "pending";
            lines.push(line);
            continue;
        }

        match migrator.migrate(unit, merger.as_ref(), &ctx).await {
            Ok(outcome) => {
                line.status = "migrated";
                line.detail = Some(format!(
                    "{} bytes via {}{}",
                    outcome.report.bytes_written,
                    outcome.report.merger,
                    outcome
                        .audit_ref
                        .as_ref()
                        .map(|r| format!(", audit {r}"))
                        .unwrap_or_default()
                ));
                for warning in &outcome.warnings {
                    output.warning(&warning.message);
                }
            }
            Err(e @ DeployError::LockConflict { .. }) => {
                line.status = "skipped_locked";
                line.detail = Some(e.to_string());
            }
            Err(e) => {
                failed = true;
                line.status = "failed";
                line.detail = Some(e.to_string());
            }
        }
        lines.push(line);
    }

    match output.mode() {
        OutputMode::Json => output.json(&lines),
        OutputMode::Quiet | OutputMode::Normal => {
            for line in &lines {
                let detail = line.detail.as_deref().unwrap_or("");
                output.progress(&format!("  {} {} {}", line.status, line.target, detail));
            }
            if failed {
                output.error("one or more migrations failed");
            } else {
                output.success("Migration complete");
            }
        }
    }

    Ok(if failed { EXIT_FAILED } else { EXIT_SUCCESS })
}
