// ABOUTME: Command module aggregator for the stateward CLI.
// ABOUTME: Re-exports the run, keys, migrate, lock, and backup command handlers.

mod backups;
mod keys;
mod locks;
mod migrate;
mod run;
mod workspace;

pub use backups::{backups, restore};
pub use keys::keys;
pub use locks::{locks, unlock};
pub use migrate::migrate;
pub use run::run;
pub use workspace::Workspace;
