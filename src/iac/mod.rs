// ABOUTME: Contract with the external infrastructure-as-code tool.
// ABOUTME: Builds per-unit invocations and interprets exit codes per step.

mod command;

pub use command::CommandTool;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::shard::ShardKey;
use crate::types::{Action, DeploymentUnit};

/// Default bound on one tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A single tool subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Init,
    Plan,
    Apply,
    Destroy,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Init => "init",
            Step::Plan => "plan",
            Step::Apply => "apply",
            Step::Destroy => "destroy",
        }
    }

    /// Whether `code` means success for this step. `plan` exits 2 when changes are pending.
    pub fn accepts_exit_code(&self, code: i32) -> bool {
        match self {
            Step::Plan => code == 0 || code == 2,
            Step::Init | Step::Apply | Step::Destroy => code == 0,
        }
    }
}

impl From<Action> for Step {
    fn from(action: Action) -> Self {
        match action {
            Action::Plan => Step::Plan,
            Action::Apply => Step::Apply,
            Action::Destroy => Step::Destroy,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved tool settings shared by every invocation of a run.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub timeout: Duration,
    /// Run `init` before each action.
    pub init: bool,
    pub var_file: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
            init: true,
            var_file: None,
            extra_args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// One tool run for one unit.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub step: Step,
    pub working_dir: PathBuf,
    pub shard_key: ShardKey,
    pub var_file: Option<PathBuf>,
    /// Where `plan` saves the planned changes for the policy gate.
    pub plan_out: Option<PathBuf>,
    /// Plan a destroy instead of an apply.
    pub plan_destroy: bool,
    pub extra_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn for_unit(
        step: Step,
        unit: &DeploymentUnit,
        key: &ShardKey,
        settings: &ToolSettings,
    ) -> Self {
        let mut env = settings.env.clone();
        env.extend(unit_env(unit, key));
        Self {
            step,
            working_dir: unit.working_dir().to_path_buf(),
            shard_key: key.clone(),
            var_file: settings.var_file.clone(),
            plan_out: None,
            plan_destroy: false,
            extra_args: settings.extra_args.clone(),
            env,
            timeout: settings.timeout,
        }
    }

    /// Save the plan to `path` so it can be inspected before the mutation.
    pub fn with_plan_out(mut self, path: impl Into<PathBuf>, action: Action) -> Self {
        self.plan_out = Some(path.into());
        self.plan_destroy = action == Action::Destroy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments after the program name:
    /// `<step> [--destroy] [--var-file=<path>] [--out=<path>] --backend-key=<shard_key> [extra...]`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.step.as_str().to_string()];
        if self.step == Step::Plan && self.plan_destroy {
            args.push("--destroy".to_string());
        }
        if self.step != Step::Init
            && let Some(var_file) = &self.var_file
        {
            args.push(format!("--var-file={}", var_file.display()));
        }
        if self.step == Step::Plan
            && let Some(plan_out) = &self.plan_out
        {
            args.push(format!("--out={}", plan_out.display()));
        }
        args.push(format!("--backend-key={}", self.shard_key));
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Environment describing a unit to external programs.
pub fn unit_env(unit: &DeploymentUnit, key: &ShardKey) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("STATEWARD_ACCOUNT".to_string(), unit.account().to_string());
    env.insert("STATEWARD_REGION".to_string(), unit.region().to_string());
    env.insert("STATEWARD_PROJECT".to_string(), unit.project().to_string());
    env.insert(
        "STATEWARD_SERVICES".to_string(),
        unit.service_names().join(","),
    );
    env.insert("STATEWARD_SHARD_KEY".to_string(), key.to_string());
    env.insert(
        "STATEWARD_SOURCE".to_string(),
        unit.source().display().to_string(),
    );
    env
}

/// Captured result of a tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` if the process was killed or never started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ToolOutput {
    /// Output for a process that could not be spawned.
    pub fn spawn_failure(error: impl std::fmt::Display, duration: Duration) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to start tool: {error}"),
            duration,
            timed_out: false,
        }
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => {
                let mut out = self.stdout.clone();
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&self.stderr);
                out
            }
        }
    }

    pub fn succeeded_for(&self, step: Step) -> bool {
        !self.timed_out && self.exit_code.is_some_and(|code| step.accepts_exit_code(code))
    }

    /// Output for a step that never started because the unit's time budget ran out.
    pub fn budget_exhausted(step: Step) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("{step} not started: unit timeout exhausted\n"),
            duration: Duration::ZERO,
            timed_out: true,
        }
    }

    /// Short failure description for errors and reports.
    pub fn failure_reason(&self, step: Step) -> String {
        if self.timed_out && self.duration.is_zero() {
            format!("{step} not started: unit timeout exhausted")
        } else if self.timed_out {
            format!("{step} timed out after {}", format_elapsed(self.duration))
        } else {
            match self.exit_code {
                Some(code) => format!("{step} exited with code {code}"),
                None => self
                    .stderr
                    .lines()
                    .next()
                    .unwrap_or("tool terminated without exit code")
                    .to_string(),
            }
        }
    }

    /// Append another step's output, e.g. `init` before the action.
    pub fn append(&mut self, other: ToolOutput) {
        self.stdout.push_str(&other.stdout);
        self.stderr.push_str(&other.stderr);
        self.duration += other.duration;
        self.exit_code = other.exit_code;
        self.timed_out = other.timed_out;
    }
}

/// Millisecond-precision human form, e.g. `1m 30s` or `300ms`.
pub fn format_elapsed(duration: Duration) -> String {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    humantime::format_duration(Duration::from_millis(millis)).to_string()
}

/// Runs tool invocations. Never fails: spawn errors come back as a failed `ToolOutput`.
#[async_trait]
pub trait IacTool: Send + Sync + 'static {
    async fn run(&self, invocation: &Invocation) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, ProjectName, Region, ServiceCategory};

    fn unit() -> DeploymentUnit {
        DeploymentUnit::new(
            AccountId::new("123456789012").unwrap(),
            Region::new("eu-west-1").unwrap(),
            ProjectName::new("web").unwrap(),
            [ServiceCategory::Storage],
            "infra/web/main.tf",
        )
    }

    #[test]
    fn plan_accepts_changes_pending() {
        assert!(Step::Plan.accepts_exit_code(0));
        assert!(Step::Plan.accepts_exit_code(2));
        assert!(!Step::Plan.accepts_exit_code(1));
        assert!(!Step::Apply.accepts_exit_code(2));
    }

    #[test]
    fn timed_out_output_never_succeeds() {
        let output = ToolOutput {
            exit_code: Some(0),
            timed_out: true,
            ..Default::default()
        };
        assert!(!output.succeeded_for(Step::Apply));
    }

    #[test]
    fn invocation_args_carry_var_file_and_backend_key() {
        let unit = unit();
        let key = ShardKey::generate(&unit);
        let settings = ToolSettings {
            var_file: Some(PathBuf::from("prod.tfvars")),
            extra_args: vec!["-no-color".to_string()],
            ..Default::default()
        };

        let apply = Invocation::for_unit(Step::Apply, &unit, &key, &settings);
        assert_eq!(
            apply.args(),
            vec![
                "apply",
                "--var-file=prod.tfvars",
                "--backend-key=storage/123456789012/eu-west-1/web/state",
                "-no-color",
            ]
        );
        assert_eq!(apply.working_dir, PathBuf::from("infra/web"));

        let init = Invocation::for_unit(Step::Init, &unit, &key, &settings);
        assert!(!init.args().iter().any(|a| a.starts_with("--var-file")));
    }

    #[test]
    fn plan_for_a_destroy_saves_a_destroy_plan() {
        let unit = unit();
        let key = ShardKey::generate(&unit);
        let plan = Invocation::for_unit(Step::Plan, &unit, &key, &ToolSettings::default())
            .with_plan_out("/tmp/web.plan", Action::Destroy);
        assert_eq!(
            plan.args(),
            vec![
                "plan",
                "--destroy",
                "--out=/tmp/web.plan",
                "--backend-key=storage/123456789012/eu-west-1/web/state",
            ]
        );
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let output = ToolOutput {
            timed_out: true,
            duration: Duration::from_micros(300_400),
            ..Default::default()
        };
        assert_eq!(output.failure_reason(Step::Apply), "apply timed out after 300ms");
        assert_eq!(format_elapsed(Duration::from_secs(90)), "1m 30s");
    }

    #[test]
    fn exhausted_budget_is_a_timeout() {
        let output = ToolOutput::budget_exhausted(Step::Apply);
        assert!(output.timed_out);
        assert!(!output.succeeded_for(Step::Apply));
        assert_eq!(
            output.failure_reason(Step::Apply),
            "apply not started: unit timeout exhausted"
        );
    }

    #[test]
    fn unit_env_describes_the_unit() {
        let unit = unit();
        let env = unit_env(&unit, &ShardKey::generate(&unit));
        assert_eq!(env["STATEWARD_ACCOUNT"], "123456789012");
        assert_eq!(env["STATEWARD_SERVICES"], "storage");
    }

    #[test]
    fn combined_joins_streams() {
        let output = ToolOutput {
            stdout: "out".to_string(),
            stderr: "err\n".to_string(),
            ..Default::default()
        };
        assert_eq!(output.combined(), "out\nerr\n");
    }
}
