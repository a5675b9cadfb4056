// ABOUTME: Compile-fail test verifying rollback cannot be called on a successful run.
// ABOUTME: This test should fail to compile, validating state machine safety.

use stateward::deploy::{BackupManager, Executed, UnitRun};

async fn try_invalid_rollback(run: UnitRun<Executed>, backups: &BackupManager) {
    // ERROR: roll_back() only exists on UnitRun<Faulted>
    run.roll_back(backups).await;
}

fn main() {}
