// ABOUTME: Keys command implementation.
// ABOUTME: Prints the shard key each selected unit maps to.

use serde::Serialize;

use super::workspace::Workspace;
use stateward::discovery::UnitFilter;
use stateward::error::Result;
use stateward::output::{Output, OutputMode};
use stateward::shard::ShardKey;

#[derive(Serialize)]
struct KeyLine {
    unit: String,
    services: Vec<String>,
    shard_key: ShardKey,
    legacy_candidates: Vec<ShardKey>,
}

pub fn keys(workspace: Workspace, filter: UnitFilter, output: Output) -> Result<()> {
    let lines: Vec<KeyLine> = workspace
        .units(&filter)?
        .iter()
        .map(|unit| KeyLine {
            unit: unit.name(),
            services: unit.service_names().into_iter().map(str::to_string).collect(),
            shard_key: ShardKey::generate(unit),
            legacy_candidates: ShardKey::legacy_candidates(unit),
        })
        .collect();

    match output.mode() {
        OutputMode::Json => output.json(&lines),
        OutputMode::Quiet => {
            for line in &lines {
                println!("{}", line.shard_key);
            }
        }
        OutputMode::Normal => {
            for line in &lines {
                println!("{}  {}", line.shard_key, line.unit);
            }
        }
    }
    Ok(())
}
