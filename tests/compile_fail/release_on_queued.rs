// ABOUTME: Compile-fail test verifying a queued unit cannot release a lock it never took.
// ABOUTME: This test should fail to compile, validating state machine safety.

use stateward::deploy::{LockManager, Queued, UnitRun};

async fn try_invalid_release(run: UnitRun<Queued>, locks: &LockManager) {
    // ERROR: release() requires a lock-holding state
    run.release(locks).await;
}

fn main() {}
