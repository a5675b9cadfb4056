// ABOUTME: Library root for stateward - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod audit;
pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod iac;
pub mod output;
pub mod policy;
pub mod redact;
pub mod report;
pub mod shard;
pub mod store;
pub mod types;
