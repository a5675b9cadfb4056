// ABOUTME: State sharding: one storage key per deployment unit.
// ABOUTME: Key generation plus explicit migration of state left under legacy keys.

mod key;
mod migration;

pub use key::{KEY_SCHEME_VERSION, STATE_SEGMENT, ShardKey, ShardKeyError};
pub use migration::{
    LegacyDetection, LegacySnapshot, LegacyState, MergeError, MergePolicy, MigrationContext,
    MigrationOutcome, MigrationReport, Migrator, NewestWins, RefuseAmbiguous, StateMerger,
};
