// ABOUTME: Deployment orchestration using the type state pattern.
// ABOUTME: Per-unit protocol, lock and backup managers, and the concurrent execution engine.

mod backup;
mod engine;
mod error;
mod lock;
mod outcome;
mod state;
mod transitions;
mod unit_run;

pub use backup::{BACKUP_PREFIX, BackupManager, BackupOutcome, BackupRecord, Restored, backup_dir};
pub use engine::{DEFAULT_MAX_WORKERS, Engine, EngineBuilder, EngineSettings, worker_count};
pub use error::{DeployError, DeployErrorKind};
pub use lock::{DEFAULT_LOCK_TTL, DEFAULT_STORE_TIMEOUT, LockAcquisition, LockManager, LockRecord};
pub use outcome::{ExecutionOutcome, UnitStatus};
pub use state::{
    Executed, Faulted, Gated, Guarded, HoldsLock, Locked, Queued, Recovered, Released,
};
pub use transitions::TransitionResult;
pub use unit_run::UnitRun;
