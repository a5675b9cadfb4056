// ABOUTME: Lock inspection and forced release.
// ABOUTME: Operator tools for locks left behind by crashed runs.

use super::workspace::Workspace;
use stateward::error::Result;
use stateward::iac::format_elapsed;
use stateward::output::{Output, OutputMode};
use stateward::shard::ShardKey;

pub async fn locks(workspace: Workspace, prefix: &str, output: Output) -> Result<()> {
    let records = workspace.locks().list(prefix).await?;

    match output.mode() {
        OutputMode::Json => output.json(&records),
        OutputMode::Quiet | OutputMode::Normal => {
            if records.is_empty() {
                output.progress("No live locks");
            }
            for record in &records {
                println!(
                    "{}  held by {} since {} (expires in {})",
                    record.lock_id,
                    record.holder_id,
                    record.acquired_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    format_elapsed(record.remaining_ttl())
                );
            }
        }
    }
    Ok(())
}

pub async fn unlock(workspace: Workspace, key: &str, output: Output) -> Result<()> {
    let key = ShardKey::parse(key)?;
    match workspace.locks().force_release(&key).await? {
        Some(record) => {
            tracing::warn!(key = %key, holder = %record.holder_id, "lock force-released");
            output.success(&format!("Released lock on {key} held by {}", record.holder_id));
        }
        None => output.success(&format!("No lock held on {key}")),
    }
    Ok(())
}
