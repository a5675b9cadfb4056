// ABOUTME: Unit actions requested by the caller.
// ABOUTME: Plan is read-only; apply and destroy mutate persisted state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle action run against every selected deployment unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Plan,
    Apply,
    Destroy,
}

impl Action {
    /// Whether this action can change the shard's persisted state.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Action::Apply | Action::Destroy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Plan => "plan",
            Action::Apply => "apply",
            Action::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
