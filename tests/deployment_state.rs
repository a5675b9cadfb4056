// ABOUTME: Tests for unit run state types and the type state pattern.
// ABOUTME: Verifies state markers and the UnitRun<S> struct.

mod support;

use stateward::deploy::{
    Executed, Gated, Locked, Queued, Recovered, Released, UnitRun, UnitStatus,
};
use stateward::shard::ShardKey;
use stateward::types::Action;
use std::mem::size_of;

// =============================================================================
// State Marker Type Tests
// =============================================================================

/// Test: States without a lock are zero-sized.
#[test]
fn lockless_state_markers_are_zero_sized() {
    assert_eq!(size_of::<Queued>(), 0, "Queued should be zero-sized");
    assert_eq!(size_of::<Released>(), 0, "Released should be zero-sized");
}

/// Test: Lock-holding states carry the lock record.
#[test]
fn lock_states_hold_data() {
    let locked = size_of::<Locked>();
    assert!(locked > 0, "Locked should hold the lock record");
    assert_eq!(size_of::<Gated>(), locked, "Gated should match Locked");
    assert_eq!(size_of::<Executed>(), locked, "Executed should match Locked");
    assert!(
        size_of::<Recovered>() >= locked,
        "Recovered holds the lock plus its status"
    );
}

#[test]
fn state_markers_implement_debug() {
    let _ = format!("{:?}", Queued);
    let _ = format!("{:?}", Released);
}

// =============================================================================
// UnitRun<S> Struct Tests
// =============================================================================

#[test]
fn lockless_run_sizes_match() {
    assert_eq!(
        size_of::<UnitRun<Queued>>(),
        size_of::<UnitRun<Released>>(),
        "runs without a lock should have the same size"
    );
}

#[test]
fn new_run_derives_shard_key() {
    let unit = support::unit("payments", &["s3"]);
    let run = UnitRun::new(unit.clone(), Action::Apply);

    assert_eq!(run.unit(), &unit);
    assert_eq!(run.action(), Action::Apply);
    assert_eq!(run.shard_key(), &ShardKey::generate(&unit));
    assert!(run.output().is_none());
}

#[test]
fn queued_run_can_finish_without_lock() {
    let unit = support::unit("payments", &["s3"]);
    let outcome = UnitRun::new(unit.clone(), Action::Plan).finish(UnitStatus::Cancelled, None);

    assert_eq!(outcome.unit, unit);
    assert_eq!(outcome.action, Action::Plan);
    assert_eq!(outcome.status, UnitStatus::Cancelled);
    assert_eq!(outcome.services, vec!["storage".to_string()]);
    assert!(outcome.error.is_none());
    assert!(outcome.backup.is_none());
    assert!(!outcome.rollback_performed);
}
