// ABOUTME: Entry point for the stateward CLI application.
// ABOUTME: Parses arguments, sets up logging, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::Workspace;
use stateward::config;
use stateward::error::Result;
use stateward::output::{Output, OutputMode};
use stateward::report::EXIT_SUCCESS;
use tracing_subscriber::EnvFilter;

/// Exit code for errors that stop a command before it reports.
const EXIT_ERROR: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set.
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = OutputMode::from_flags(cli.quiet, cli.json);
    let code = match run(cli, Output::new(mode)).await {
        Ok(code) => code,
        Err(e) => {
            Output::new(mode).error(&e.to_string());
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, output: Output) -> Result<i32> {
    stateward::redact::check_rules()?;
    let destination = cli.destination.as_deref();
    match cli.command {
        Commands::Init { force } => {
            let cwd = std::env::current_dir()?;
            config::init_config(&cwd, force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(EXIT_SUCCESS)
        }
        Commands::Run {
            action,
            units,
            fail_on_skip,
            trigger,
        } => {
            let workspace = Workspace::open(destination)?;
            commands::run(workspace, action, units.into(), fail_on_skip, trigger, output).await
        }
        Commands::Keys { units } => {
            let workspace = Workspace::open(destination)?;
            commands::keys(workspace, units.into(), output)?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Migrate {
            units,
            merge,
            dry_run,
        } => {
            let workspace = Workspace::open(destination)?;
            commands::migrate(workspace, units.into(), merge, dry_run, output).await
        }
        Commands::Locks { prefix } => {
            let workspace = Workspace::open(destination)?;
            commands::locks(workspace, &prefix, output).await?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Unlock { key } => {
            let workspace = Workspace::open(destination)?;
            commands::unlock(workspace, &key, output).await?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Backups { key } => {
            let workspace = Workspace::open(destination)?;
            commands::backups(workspace, &key, output).await?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Restore { key, version } => {
            let workspace = Workspace::open(destination)?;
            commands::restore(workspace, &key, &version, output).await?;
            Ok(EXIT_SUCCESS)
        }
    }
}
