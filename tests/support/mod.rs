// ABOUTME: Test support utilities.
// ABOUTME: Tracing setup, unit builders, and a scripted stand-in for the IaC tool.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stateward::iac::{IacTool, Invocation, Step, ToolOutput};
use stateward::store::MemoryStore;
use stateward::types::{AccountId, DeploymentUnit, ProjectName, Region, ServiceCategory};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("stateward=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

pub fn unit(project: &str, services: &[&str]) -> DeploymentUnit {
    unit_in(REGION, project, services)
}

pub fn unit_in(region: &str, project: &str, services: &[&str]) -> DeploymentUnit {
    DeploymentUnit::new(
        AccountId::new(ACCOUNT).unwrap(),
        Region::new(region).unwrap(),
        ProjectName::new(project).unwrap(),
        services.iter().map(|s| ServiceCategory::classify(s)),
        format!("infra/{project}/main.tf"),
    )
}

/// What the stub does for one step.
#[derive(Debug, Clone)]
struct Script {
    exit_code: i32,
    stdout: String,
    /// Written to the invocation's shard key before exiting, like a real apply.
    writes: Option<Bytes>,
    /// Make every later store call on the shard key fail.
    breaks_store: bool,
    /// Report the step as killed at its timeout.
    times_out: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            writes: None,
            breaks_store: false,
            times_out: false,
        }
    }
}

/// Scripted IaC tool. Every step exits 0 unless told otherwise.
#[derive(Clone)]
pub struct StubTool {
    store: MemoryStore,
    scripts: Arc<Mutex<HashMap<&'static str, Script>>>,
    delay: Duration,
    invocations: Arc<Mutex<Vec<Invocation>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StubTool {
    pub fn new(store: &MemoryStore) -> Self {
        Self {
            store: store.clone(),
            scripts: Arc::new(Mutex::new(HashMap::new())),
            delay: Duration::ZERO,
            invocations: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn exits(self, step: Step, code: i32) -> Self {
        self.scripts.lock().entry(step.as_str()).or_default().exit_code = code;
        self
    }

    pub fn prints(self, step: Step, stdout: &str) -> Self {
        self.scripts.lock().entry(step.as_str()).or_default().stdout = stdout.to_string();
        self
    }

    pub fn writes_state(self, step: Step, data: &str) -> Self {
        self.scripts.lock().entry(step.as_str()).or_default().writes =
            Some(Bytes::from(data.to_string()));
        self
    }

    pub fn breaks_store(self, step: Step) -> Self {
        self.scripts.lock().entry(step.as_str()).or_default().breaks_store = true;
        self
    }

    pub fn times_out(self, step: Step) -> Self {
        self.scripts.lock().entry(step.as_str()).or_default().times_out = true;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn steps(&self) -> Vec<Step> {
        self.invocations().iter().map(|i| i.step).collect()
    }

    /// Most invocations that were ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IacTool for StubTool {
    async fn run(&self, invocation: &Invocation) -> ToolOutput {
        self.invocations.lock().push(invocation.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let script = self
            .scripts
            .lock()
            .get(invocation.step.as_str())
            .cloned()
            .unwrap_or_default();
        if let Some(data) = script.writes {
            self.store.seed(invocation.shard_key.as_str(), data);
        }
        if script.breaks_store {
            self.store.inject_failure(invocation.shard_key.as_str());
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        if script.times_out {
            return ToolOutput {
                exit_code: None,
                stdout: script.stdout,
                stderr: format!("{} timed out\n", invocation.step),
                duration: invocation.timeout,
                timed_out: true,
            };
        }
        ToolOutput {
            exit_code: Some(script.exit_code),
            stdout: script.stdout,
            stderr: String::new(),
            duration: self.delay,
            timed_out: false,
        }
    }
}
