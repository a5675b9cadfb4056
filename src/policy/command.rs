// ABOUTME: Policy gate backed by an external command.
// ABOUTME: Exit 0 passes; otherwise each non-empty stdout line is a violation.

use async_trait::async_trait;
use nonempty::NonEmpty;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::iac::unit_env;
use crate::shard::ShardKey;
use crate::types::{Action, DeploymentUnit};

use super::{PlannedChanges, PolicyError, PolicyGate, PolicyVerdict};

pub const DEFAULT_POLICY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Environment variable holding the path of the saved plan.
pub const PLAN_FILE_ENV: &str = "STATEWARD_PLAN_FILE";

/// Runs `argv` with the unit described in `STATEWARD_*` environment variables.
///
/// The saved plan's path is in `STATEWARD_PLAN_FILE` and the plan step's
/// output is written to the command's stdin.
#[derive(Debug, Clone)]
pub struct CommandGate {
    argv: NonEmpty<String>,
    timeout: Duration,
}

impl CommandGate {
    pub fn new(argv: NonEmpty<String>) -> Self {
        Self {
            argv,
            timeout: DEFAULT_POLICY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PolicyGate for CommandGate {
    async fn evaluate(
        &self,
        unit: &DeploymentUnit,
        key: &ShardKey,
        action: Action,
        plan: &PlannedChanges,
    ) -> Result<PolicyVerdict, PolicyError> {
        let mut env = unit_env(unit, key);
        env.insert("STATEWARD_ACTION".to_string(), action.to_string());
        env.insert(
            PLAN_FILE_ENV.to_string(),
            plan.file.display().to_string(),
        );

        let mut child = Command::new(self.argv.first())
            .args(self.argv.tail())
            .current_dir(unit.working_dir())
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin
                && let Err(e) = stdin.write_all(plan.output.as_bytes()).await
            {
                // The command may decide without reading its input.
                tracing::debug!(error = %e, "policy command did not read the plan");
            }
        };
        let run = async { tokio::join!(feed, child.wait_with_output()).1 };
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| PolicyError::Timeout(self.timeout))??;

        if output.status.success() {
            return Ok(PolicyVerdict::pass());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut violations: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if violations.is_empty() {
            violations.push(format!(
                "policy command exited with {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
            ));
        }
        Ok(PolicyVerdict::fail(violations))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::{AccountId, ProjectName, Region};

    fn unit(dir: &std::path::Path) -> DeploymentUnit {
        DeploymentUnit::new(
            AccountId::new("123456789012").unwrap(),
            Region::new("us-east-1").unwrap(),
            ProjectName::new("api").unwrap(),
            [],
            dir.join("main.tf"),
        )
    }

    fn plan(output: &str) -> PlannedChanges {
        PlannedChanges {
            file: std::path::PathBuf::from("/tmp/api.plan"),
            output: output.to_string(),
        }
    }

    fn sh(script: &str) -> CommandGate {
        CommandGate::new(NonEmpty::from_vec(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
        .unwrap())
    }

    #[tokio::test]
    async fn zero_exit_passes() {
        let dir = tempfile::tempdir().unwrap();
        let u = unit(dir.path());
        let verdict = sh("exit 0")
            .evaluate(&u, &ShardKey::generate(&u), Action::Apply, &plan(""))
            .await
            .unwrap();
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn stdout_lines_become_violations() {
        let dir = tempfile::tempdir().unwrap();
        let u = unit(dir.path());
        let verdict = sh("echo \"no tags on $STATEWARD_PROJECT\"; echo; echo public bucket; exit 1")
            .evaluate(&u, &ShardKey::generate(&u), Action::Apply, &plan(""))
            .await
            .unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.violations, vec!["no tags on api", "public bucket"]);
    }

    #[tokio::test]
    async fn command_reads_the_plan() {
        let dir = tempfile::tempdir().unwrap();
        let u = unit(dir.path());
        let script = "grep -q 'to destroy' && echo \"destroy planned, see $STATEWARD_PLAN_FILE\" && exit 1; exit 0";

        let verdict = sh(script)
            .evaluate(
                &u,
                &ShardKey::generate(&u),
                Action::Apply,
                &plan("Plan: 0 to add, 0 to change, 2 to destroy."),
            )
            .await
            .unwrap();
        assert_eq!(verdict.violations, vec!["destroy planned, see /tmp/api.plan"]);

        let verdict = sh(script)
            .evaluate(&u, &ShardKey::generate(&u), Action::Apply, &plan("Plan: 1 to add."))
            .await
            .unwrap();
        assert!(verdict.passed);
    }
}
