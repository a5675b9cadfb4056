// ABOUTME: Compile-fail test verifying a failed mutation cannot skip rollback.
// ABOUTME: This test should fail to compile, validating state machine safety.

use stateward::deploy::{Faulted, LockManager, UnitRun};

async fn try_release_without_rollback(run: UnitRun<Faulted>, locks: &LockManager) {
    // ERROR: Faulted does not hold a releasable lock; roll_back() comes first
    run.release(locks).await;
}

fn main() {}
