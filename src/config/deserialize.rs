// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles command lines given as a string or a list.

use nonempty::NonEmpty;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandEntry {
    Line(String),
    Argv(Vec<String>),
}

impl CommandEntry {
    fn into_argv(self) -> Result<NonEmpty<String>, String> {
        let argv = match self {
            CommandEntry::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandEntry::Argv(argv) => argv,
        };
        NonEmpty::from_vec(argv).ok_or_else(|| "command cannot be empty".to_string())
    }
}

/// `command: conftest test` or `command: [conftest, test]`.
pub fn deserialize_argv<'de, D>(deserializer: D) -> Result<NonEmpty<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    CommandEntry::deserialize(deserializer)?
        .into_argv()
        .map_err(serde::de::Error::custom)
}

pub fn deserialize_worker_cap<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = usize::deserialize(deserializer)?;
    if value == 0 {
        return Err(serde::de::Error::custom("max_workers must be at least 1"));
    }
    Ok(value)
}
