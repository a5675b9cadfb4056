// ABOUTME: Unit run state marker types for the type state pattern.
// ABOUTME: States that hold a shard lock carry its record, so only they can release it.

use super::backup::BackupOutcome;
use super::lock::LockRecord;
use super::outcome::UnitStatus;

/// Waiting for a worker. Available actions: `acquire_lock()`, `finish()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Queued;

/// Shard lock held. Available actions: `check_legacy()`, `check_policy()`,
/// `run_read_only()`, `release()`
#[derive(Debug, Clone)]
pub struct Locked {
    pub(crate) lock: LockRecord,
}

/// Policy gate passed. Available actions: `back_up()`, `release()`
#[derive(Debug, Clone)]
pub struct Gated {
    pub(crate) lock: LockRecord,
}

/// Backup taken (or none needed). Available actions: `run_mutation()`, `release()`
#[derive(Debug, Clone)]
pub struct Guarded {
    pub(crate) lock: LockRecord,
    pub(crate) backup: BackupOutcome,
}

/// Tool finished successfully. Available actions: `release()`
#[derive(Debug, Clone)]
pub struct Executed {
    pub(crate) lock: LockRecord,
}

/// Mutation failed. Available actions: `roll_back()`
#[derive(Debug, Clone)]
pub struct Faulted {
    pub(crate) lock: LockRecord,
    pub(crate) backup: BackupOutcome,
}

/// Rollback attempted. Available actions: `status()`, `release()`
#[derive(Debug, Clone)]
pub struct Recovered {
    pub(crate) lock: LockRecord,
    pub(crate) status: UnitStatus,
}

/// Lock released. Available actions: `finish()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Released;

mod sealed {
    pub trait Sealed {}
}

/// States holding the shard lock.
pub trait HoldsLock: sealed::Sealed {
    fn lock(&self) -> &LockRecord;
}

macro_rules! holds_lock {
    ($($state:ty),*) => {
        $(
            impl sealed::Sealed for $state {}
            impl HoldsLock for $state {
                fn lock(&self) -> &LockRecord {
                    &self.lock
                }
            }
        )*
    };
}

holds_lock!(Locked, Gated, Guarded, Executed, Recovered);
