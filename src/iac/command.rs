// ABOUTME: External-process implementation of the IaC tool contract.
// ABOUTME: Runs the tool in its own process group and kills the whole group on timeout.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{IacTool, Invocation, ToolOutput, format_elapsed};
use crate::redact::{REDACTED, is_sensitive_key};

/// How long to wait for killed group members to disappear.
const GROUP_EXIT_GRACE: Duration = Duration::from_secs(5);

/// How long output readers may drain after the process group is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Runs a real tool binary such as `terraform` or `tofu`.
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: String,
}

impl CommandTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl IacTool for CommandTool {
    async fn run(&self, invocation: &Invocation) -> ToolOutput {
        let started = Instant::now();
        let args = invocation.args();

        tracing::debug!(
            program = %self.program,
            args = ?args,
            env = ?loggable_env(&invocation.env),
            dir = %invocation.working_dir.display(),
            "running tool"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(program = %self.program, error = %e, "failed to spawn tool");
                return ToolOutput::spawn_failure(e, started.elapsed());
            }
        };

        let group = ProcessGroup::of(&child);
        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;
        // Nothing the tool started may outlive the invocation.
        group.terminate(&mut child).await;
        let stdout = stdout.finish().await;
        let mut stderr = stderr.finish().await;

        match waited {
            Ok(Ok(status)) => {
                let result = ToolOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    duration: started.elapsed(),
                    timed_out: false,
                };
                tracing::debug!(
                    step = %invocation.step,
                    exit_code = ?result.exit_code,
                    "tool finished"
                );
                result
            }
            Ok(Err(e)) => {
                tracing::error!(step = %invocation.step, error = %e, "failed to wait for tool");
                let mut result = ToolOutput::spawn_failure(e, started.elapsed());
                result.stdout = stdout;
                result
            }
            Err(_) => {
                let limit = format_elapsed(invocation.timeout);
                tracing::warn!(
                    step = %invocation.step,
                    timeout = %limit,
                    "tool timed out, process group killed"
                );
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("{} timed out after {limit}\n", invocation.step));
                ToolOutput {
                    exit_code: None,
                    stdout,
                    stderr,
                    duration: started.elapsed(),
                    timed_out: true,
                }
            }
        }
    }
}

/// The tool's process group. Killed when terminated or dropped.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    id: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { id: child.id() }
    }

    /// Kill every member, reap the leader, and wait until the group is empty.
    async fn terminate(mut self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(id) = self.id.take() {
            signal_group(id, libc::SIGKILL);
            if let Err(e) = child.wait().await {
                tracing::warn!(error = %e, "failed to reap tool process");
            }
            let deadline = Instant::now() + GROUP_EXIT_GRACE;
            while signal_group(id, 0) {
                if Instant::now() >= deadline {
                    tracing::warn!(pgid = id, "tool process group still present after kill");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            return;
        }

        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "tool already exited");
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(id) = self.id.take() {
            signal_group(id, libc::SIGKILL);
        }
    }
}

/// Send `signal` to group `id`. Signal 0 only checks that the group exists.
#[cfg(unix)]
fn signal_group(id: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(id) else {
        return false;
    };
    unsafe { libc::killpg(pgid, signal) == 0 }
}

/// Output read as it is produced, so a killed tool still leaves what it printed.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = stream.map(|mut stream| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    async fn finish(self) -> String {
        if let Some(mut reader) = self.reader
            && tokio::time::timeout(READER_GRACE, &mut reader).await.is_err()
        {
            reader.abort();
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Sorted `KEY=value` pairs with sensitive values masked.
fn loggable_env(env: &HashMap<String, String>) -> Vec<String> {
    let mut pairs: Vec<String> = env
        .iter()
        .map(|(key, value)| {
            if is_sensitive_key(key) {
                format!("{key}={REDACTED}")
            } else {
                format!("{key}={value}")
            }
        })
        .collect();
    pairs.sort();
    pairs
}
