// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use stateward::discovery::UnitFilter;
use stateward::shard::MergePolicy;
use stateward::types::Action;

#[derive(Parser)]
#[command(name = "stateward")]
#[command(about = "Sharded, lock-guarded infrastructure-as-code deployments")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Target destination (defined in config)
    #[arg(short, long, global = true)]
    pub destination: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Unit selection shared by every command that reads the units file.
#[derive(Args, Debug, Clone, Default)]
pub struct UnitArgs {
    /// Only units in this account
    #[arg(long)]
    pub account: Option<String>,

    /// Only units in this region
    #[arg(long)]
    pub region: Option<String>,

    /// Only units of this project
    #[arg(long)]
    pub project: Option<String>,

    /// Only units using this service (repeatable)
    #[arg(long = "service")]
    pub services: Vec<String>,
}

impl From<UnitArgs> for UnitFilter {
    fn from(args: UnitArgs) -> Self {
        UnitFilter {
            account: args.account,
            region: args.region,
            project: args.project,
            services: args.services,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new stateward.yml configuration file
    Init {
        /// Overwrite existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Run an action on every selected unit
    Run {
        #[arg(value_enum)]
        action: Action,

        #[command(flatten)]
        units: UnitArgs,

        /// Exit non-zero when units were skipped because their lock was held
        #[arg(long)]
        fail_on_skip: bool,

        /// What started this run, recorded in the audit log
        #[arg(long)]
        trigger: Option<String>,
    },

    /// Print the shard key of every selected unit
    Keys {
        #[command(flatten)]
        units: UnitArgs,
    },

    /// Move state left under legacy shard keys to the current keys
    Migrate {
        #[command(flatten)]
        units: UnitArgs,

        /// How to combine several legacy snapshots
        #[arg(long, value_enum, default_value_t = MergePolicy::Refuse)]
        merge: MergePolicy,

        /// Only report what would be migrated
        #[arg(long)]
        dry_run: bool,
    },

    /// List live shard locks
    Locks {
        /// Only locks whose key starts with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Force-release a shard lock left behind by a crashed run
    Unlock {
        /// Shard key, e.g. storage/123456789012/us-east-1/payments/state
        key: String,
    },

    /// List backups and retained versions of a shard
    Backups {
        key: String,
    },

    /// Restore a retained version of a shard over its current state
    Restore {
        key: String,

        /// Version id as listed by `stateward backups`
        #[arg(long)]
        version: String,
    },
}
