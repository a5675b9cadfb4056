// ABOUTME: Run command implementation.
// ABOUTME: Executes plan, apply, or destroy across units and reports the aggregate result.

use std::time::Instant;
use tokio::sync::watch;

use super::workspace::Workspace;
use stateward::discovery::UnitFilter;
use stateward::error::Result;
use stateward::output::Output;
use stateward::report::RunReport;
use stateward::types::Action;

/// Run `action` on every selected unit. Returns the process exit code.
pub async fn run(
    workspace: Workspace,
    action: Action,
    filter: UnitFilter,
    fail_on_skip: bool,
    trigger: Option<String>,
    mut output: Output,
) -> Result<i32> {
    output.start_timer();
    let units = workspace.units(&filter)?;
    let metadata = workspace.metadata(trigger)?;
    output.progress(&format!(
        "Running {} on {} unit(s) (correlation {})",
        action,
        units.len(),
        metadata.correlation_id
    ));
    let engine = workspace.engine(metadata)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing in-flight units");
            let _ = cancel_tx.send(true);
        }
    });

    let started = Instant::now();
    let outcomes = engine.run(units, action, cancel_rx).await;
    interrupt.abort();

    let report = RunReport::new(&outcomes, started.elapsed());
    output.report(&report);
    Ok(report.exit_code(fail_on_skip))
}
