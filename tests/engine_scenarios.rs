// ABOUTME: End-to-end scenarios for the execution engine against in-memory stores.
// ABOUTME: Covers success, rollback, parallel units, lock skips, plans, and cancellation.

mod support;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use stateward::audit::RunMetadata;
use stateward::deploy::{Engine, EngineSettings, ExecutionOutcome, LockManager, UnitStatus};
use stateward::diagnostics::WarningKind;
use stateward::iac::{IacTool, Invocation, Step, ToolOutput};
use stateward::policy::{PlannedChanges, PolicyError, PolicyGate, PolicyVerdict};
use stateward::report::{EXIT_FAILED, EXIT_MANUAL_INTERVENTION, EXIT_SUCCESS, RunReport};
use stateward::shard::ShardKey;
use stateward::store::MemoryStore;
use stateward::types::{Action, DeploymentUnit, HolderId};
use support::{StubTool, unit};

struct Harness {
    objects: MemoryStore,
    locks: MemoryStore,
    settings: EngineSettings,
}

impl Harness {
    fn new() -> Self {
        support::init_tracing();
        Self {
            objects: MemoryStore::new(),
            locks: MemoryStore::new(),
            settings: EngineSettings::default(),
        }
    }

    fn tool(&self) -> StubTool {
        StubTool::new(&self.objects)
    }

    fn engine(&self, tool: Arc<dyn IacTool>) -> Engine {
        self.builder(tool).build()
    }

    fn builder(&self, tool: Arc<dyn IacTool>) -> stateward::deploy::EngineBuilder {
        let metadata = RunMetadata::new("test", HolderId::new("engine-under-test"));
        Engine::builder(
            Arc::new(self.objects.clone()),
            Arc::new(self.locks.clone()),
            tool,
            metadata,
        )
        .settings(self.settings.clone())
        .audit("audit")
    }

    fn lock_manager(&self) -> LockManager {
        LockManager::new(Arc::new(self.locks.clone()))
    }

    fn audit_keys(&self) -> Vec<String> {
        self.objects
            .keys()
            .into_iter()
            .filter(|k| k.starts_with("audit/"))
            .collect()
    }

    fn backup_keys(&self) -> Vec<String> {
        self.objects
            .keys()
            .into_iter()
            .filter(|k| k.starts_with("backups/"))
            .collect()
    }
}

async fn run(engine: &Engine, units: Vec<DeploymentUnit>, action: Action) -> Vec<ExecutionOutcome> {
    let (_tx, rx) = watch::channel(false);
    engine.run(units, action, rx).await
}

async fn assert_unlocked(harness: &Harness, key: &ShardKey) {
    let record = harness.lock_manager().inspect(key).await.unwrap();
    assert!(record.is_none(), "lock on {key} should be released");
}

// =============================================================================
// Scenario A: first apply on an empty shard
// =============================================================================

#[tokio::test]
async fn first_apply_succeeds_and_is_audited() {
    let harness = Harness::new();
    let tool = harness.tool().writes_state(Step::Apply, "v1");
    let engine = harness.engine(Arc::new(tool.clone()));
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);

    let outcomes = run(&engine, vec![payments], Action::Apply).await;

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.status, UnitStatus::Succeeded);
    assert!(outcome.backup.is_none(), "nothing to back up on first apply");
    assert!(!outcome.rollback_performed);
    assert_eq!(harness.objects.snapshot(key.as_str()).unwrap(), "v1");
    assert_eq!(tool.steps(), vec![Step::Init, Step::Plan, Step::Apply]);

    let audit_ref = outcome.audit_ref.as_ref().expect("audit record written");
    assert!(audit_ref.as_str().starts_with("audit/123456789012/payments/apply-"));
    assert_eq!(harness.audit_keys(), vec![audit_ref.as_str().to_string()]);
    assert_unlocked(&harness, &key).await;
}

// =============================================================================
// Scenario B: failed apply is rolled back
// =============================================================================

#[tokio::test]
async fn failed_apply_restores_previous_state() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");

    let tool = harness
        .tool()
        .writes_state(Step::Apply, "half-applied")
        .prints(Step::Apply, "Error: access denied, password=hunter2")
        .exits(Step::Apply, 1);
    let engine = harness.engine(Arc::new(tool));

    let outcomes = run(&engine, vec![payments], Action::Apply).await;
    let outcome = &outcomes[0];

    assert_eq!(outcome.status, UnitStatus::RolledBack);
    assert!(outcome.rollback_performed);
    assert!(outcome.backup.is_some());
    assert_eq!(harness.objects.snapshot(key.as_str()).unwrap(), "v1");
    assert!(outcome.raw_output.contains("hunter2"));
    assert!(!outcome.redacted_output.contains("hunter2"));
    assert_unlocked(&harness, &key).await;

    let report = RunReport::new(&outcomes, Duration::from_secs(1));
    assert_eq!(report.summary.rolled_back, 1);
    assert_eq!(report.exit_code(false), EXIT_FAILED);
}

#[tokio::test]
async fn failed_apply_without_prior_state_is_reported_as_such() {
    let harness = Harness::new();
    let tool = harness.tool().exits(Step::Apply, 1);
    let engine = harness.engine(Arc::new(tool));
    let payments = unit("payments", &["s3"]);

    let outcomes = run(&engine, vec![payments.clone()], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::FailedNoPriorState);
    assert!(!outcomes[0].rollback_performed);
    assert_unlocked(&harness, &ShardKey::generate(&payments)).await;
}

#[tokio::test]
async fn failed_rollback_requires_manual_intervention() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");

    let tool = harness
        .tool()
        .writes_state(Step::Apply, "broken")
        .breaks_store(Step::Apply)
        .exits(Step::Apply, 1);
    let engine = harness.engine(Arc::new(tool));

    let outcomes = run(&engine, vec![payments], Action::Apply).await;
    let outcome = &outcomes[0];

    assert_eq!(outcome.status, UnitStatus::RollbackFailed);
    assert!(outcome.status.requires_operator());
    assert!(outcome.backup.is_some(), "backup location is kept for the operator");
    assert_unlocked(&harness, &key).await;

    let report = RunReport::new(&outcomes, Duration::from_secs(1));
    assert_eq!(report.summary.manual_intervention_required, 1);
    assert_eq!(report.exit_code(false), EXIT_MANUAL_INTERVENTION);
}

// =============================================================================
// Scenario C: independent units run in parallel
// =============================================================================

#[tokio::test]
async fn distinct_units_run_in_parallel() {
    let harness = Harness::new();
    let tool = harness
        .tool()
        .with_delay(Duration::from_millis(100))
        .writes_state(Step::Apply, "applied");
    let engine = harness.engine(Arc::new(tool.clone()));
    let units = vec![
        unit("payments", &["s3"]),
        unit("payments", &["kms"]),
        unit("payments", &["iam"]),
    ];
    let keys: Vec<ShardKey> = units.iter().map(ShardKey::generate).collect();

    let outcomes = run(&engine, units, Action::Apply).await;

    assert!(outcomes.iter().all(|o| o.status == UnitStatus::Succeeded));
    assert!(tool.peak_concurrency() >= 2, "units should overlap");
    for key in &keys {
        assert_eq!(harness.objects.snapshot(key.as_str()).unwrap(), "applied");
        assert_unlocked(&harness, key).await;
    }
    assert_eq!(harness.audit_keys().len(), 3);
}

#[tokio::test]
async fn worker_cap_bounds_concurrency() {
    let mut harness = Harness::new();
    harness.settings.max_workers = 1;
    harness.settings.tool.init = false;
    let tool = harness.tool().with_delay(Duration::from_millis(20));
    let engine = harness.engine(Arc::new(tool.clone()));
    let units = (0..4).map(|i| unit(&format!("p{i}"), &["s3"])).collect();

    let outcomes = run(&engine, units, Action::Apply).await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(tool.peak_concurrency(), 1);
}

#[tokio::test]
async fn sibling_failure_does_not_abort_other_units() {
    let harness = Harness::new();
    let ok = unit("ok", &["s3"]);
    let bad = unit("bad", &["s3"]);

    struct FailFor(String, StubTool);

    #[async_trait]
    impl IacTool for FailFor {
        async fn run(&self, invocation: &Invocation) -> ToolOutput {
            let mut output = self.1.run(invocation).await;
            if invocation.shard_key.as_str() == self.0 && invocation.step == Step::Apply {
                output.exit_code = Some(1);
            }
            output
        }
    }

    let tool = FailFor(ShardKey::generate(&bad).to_string(), harness.tool());
    let engine = harness.engine(Arc::new(tool));

    let outcomes = run(&engine, vec![bad, ok], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::FailedNoPriorState);
    assert_eq!(outcomes[1].status, UnitStatus::Succeeded);
}

// =============================================================================
// Scenario D: two descriptors sharing a shard key
// =============================================================================

#[tokio::test]
async fn held_lock_skips_unit_without_running_tool() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    let other = HolderId::new("someone-else");
    assert!(
        harness
            .lock_manager()
            .acquire(&key, &other, Duration::from_secs(60))
            .await
            .is_acquired()
    );

    let tool = harness.tool();
    let engine = harness.engine(Arc::new(tool.clone()));
    let outcomes = run(&engine, vec![payments], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::SkippedLocked);
    assert!(outcomes[0].error.as_deref().unwrap().contains("someone-else"));
    assert!(tool.invocations().is_empty());
    // The other holder's lock is untouched.
    let record = harness.lock_manager().inspect(&key).await.unwrap().unwrap();
    assert_eq!(record.holder_id, other);

    let report = RunReport::new(&outcomes, Duration::from_secs(1));
    assert_eq!(report.exit_code(false), EXIT_SUCCESS);
    assert_eq!(report.exit_code(true), 1);
}

#[tokio::test]
async fn duplicate_shard_key_in_one_run_is_skipped_locked() {
    let harness = Harness::new();
    let tool = harness.tool().with_delay(Duration::from_millis(200));
    let engine = harness.engine(Arc::new(tool));
    // Both labels classify as storage.
    let first = unit("payments", &["s3"]);
    let second = unit("payments", &["storage"]);
    assert_eq!(ShardKey::generate(&first), ShardKey::generate(&second));

    let outcomes = run(&engine, vec![first, second.clone()], Action::Apply).await;

    let succeeded = outcomes.iter().filter(|o| o.status == UnitStatus::Succeeded).count();
    let skipped = outcomes
        .iter()
        .filter(|o| o.status == UnitStatus::SkippedLocked)
        .count();
    assert_eq!((succeeded, skipped), (1, 1));
    assert_unlocked(&harness, &ShardKey::generate(&second)).await;
}

// =============================================================================
// Scenario E: plan never backs up
// =============================================================================

#[tokio::test]
async fn plan_with_pending_changes_succeeds_without_backup() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");

    let tool = harness
        .tool()
        .exits(Step::Plan, 2)
        .prints(Step::Plan, "Plan: 1 to add, 0 to change, 0 to destroy.");
    let engine = harness.engine(Arc::new(tool.clone()));

    let outcomes = run(&engine, vec![payments], Action::Plan).await;
    let outcome = &outcomes[0];

    assert_eq!(outcome.status, UnitStatus::Succeeded);
    assert!(outcome.backup.is_none());
    assert!(harness.backup_keys().is_empty());
    assert_eq!(tool.steps(), vec![Step::Init, Step::Plan]);
    assert!(outcome.redacted_output.contains("1 to add"));
    assert_unlocked(&harness, &key).await;
}

#[tokio::test]
async fn failed_plan_is_failed_without_rollback() {
    let harness = Harness::new();
    let tool = harness.tool().exits(Step::Plan, 1);
    let engine = harness.engine(Arc::new(tool));

    let outcomes = run(&engine, vec![unit("payments", &["s3"])], Action::Plan).await;

    assert_eq!(outcomes[0].status, UnitStatus::Failed);
    assert!(!outcomes[0].rollback_performed);
}

// =============================================================================
// Tool timeouts
// =============================================================================

#[tokio::test]
async fn timed_out_apply_is_rolled_back_and_unlocked() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");
    let tool = harness
        .tool()
        .prints(Step::Apply, "aws_s3_bucket.logs: Modifying...")
        .writes_state(Step::Apply, "half-applied")
        .times_out(Step::Apply);
    let engine = harness.engine(Arc::new(tool));

    let outcomes = run(&engine, vec![payments], Action::Apply).await;
    let outcome = &outcomes[0];

    assert_eq!(outcome.status, UnitStatus::RolledBack);
    assert!(outcome.rollback_performed);
    assert!(outcome.error.as_deref().unwrap().contains("timed out"));
    assert!(outcome.raw_output.contains("Modifying..."));
    assert_eq!(harness.objects.snapshot(key.as_str()).unwrap(), "v1");
    assert_unlocked(&harness, &key).await;
}

#[tokio::test]
async fn timed_out_destroy_is_rolled_back() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");
    let tool = harness
        .tool()
        .writes_state(Step::Destroy, "partly-destroyed")
        .times_out(Step::Destroy);
    let engine = harness.engine(Arc::new(tool));

    let outcomes = run(&engine, vec![payments], Action::Destroy).await;

    assert_eq!(outcomes[0].status, UnitStatus::RolledBack);
    assert_eq!(harness.objects.snapshot(key.as_str()).unwrap(), "v1");
    assert_unlocked(&harness, &key).await;
}

#[tokio::test]
async fn timed_out_plan_fails_without_rollback() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");
    let tool = harness.tool().times_out(Step::Plan);
    let engine = harness.engine(Arc::new(tool));

    let outcomes = run(&engine, vec![payments], Action::Plan).await;

    assert_eq!(outcomes[0].status, UnitStatus::Failed);
    assert!(!outcomes[0].rollback_performed);
    assert!(outcomes[0].error.as_deref().unwrap().contains("timed out"));
    assert!(harness.backup_keys().is_empty());
    assert_unlocked(&harness, &key).await;
}

// =============================================================================
// Gates before the tool runs
// =============================================================================

struct Deny(Vec<String>);

#[async_trait]
impl PolicyGate for Deny {
    async fn evaluate(
        &self,
        _unit: &DeploymentUnit,
        _key: &ShardKey,
        _action: Action,
        _plan: &PlannedChanges,
    ) -> Result<PolicyVerdict, PolicyError> {
        Ok(PolicyVerdict::fail(self.0.clone()))
    }
}

#[tokio::test]
async fn policy_rejection_stops_before_backup() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");
    let tool = harness.tool();
    let engine = harness
        .builder(Arc::new(tool.clone()))
        .policy(Arc::new(Deny(vec!["bucket must be encrypted".to_string()])))
        .build();

    let outcomes = run(&engine, vec![payments], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::PolicyRejected);
    assert!(outcomes[0].error.as_deref().unwrap().contains("bucket must be encrypted"));
    assert_eq!(tool.steps(), vec![Step::Init, Step::Plan]);
    assert!(harness.backup_keys().is_empty());
    assert_unlocked(&harness, &key).await;
}

/// Remembers the plan it was shown.
#[derive(Default)]
struct Recording(parking_lot::Mutex<Option<PlannedChanges>>);

#[async_trait]
impl PolicyGate for Recording {
    async fn evaluate(
        &self,
        _unit: &DeploymentUnit,
        _key: &ShardKey,
        _action: Action,
        plan: &PlannedChanges,
    ) -> Result<PolicyVerdict, PolicyError> {
        *self.0.lock() = Some(plan.clone());
        Ok(PolicyVerdict::pass())
    }
}

#[tokio::test]
async fn gate_evaluates_the_planned_changes() {
    let harness = Harness::new();
    let tool = harness
        .tool()
        .prints(Step::Plan, "Plan: 0 to add, 0 to change, 3 to destroy.");
    let gate = Arc::new(Recording::default());
    let engine = harness
        .builder(Arc::new(tool.clone()))
        .policy(gate.clone())
        .build();

    let outcomes = run(&engine, vec![unit("payments", &["s3"])], Action::Destroy).await;

    assert_eq!(outcomes[0].status, UnitStatus::Succeeded);
    let seen = gate.0.lock().clone().expect("gate consulted");
    assert_eq!(seen.output, "Plan: 0 to add, 0 to change, 3 to destroy.");
    let plan = tool
        .invocations()
        .into_iter()
        .find(|i| i.step == Step::Plan)
        .unwrap();
    assert_eq!(plan.plan_out.as_ref(), Some(&seen.file));
    assert!(plan.plan_destroy);
    assert_eq!(tool.steps(), vec![Step::Init, Step::Plan, Step::Destroy]);
}

#[tokio::test]
async fn failed_plan_before_a_mutation_fails_without_backup() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");
    let tool = harness.tool().exits(Step::Plan, 1);
    let engine = harness.engine(Arc::new(tool.clone()));

    let outcomes = run(&engine, vec![payments], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::Failed);
    assert!(!outcomes[0].rollback_performed);
    assert!(harness.backup_keys().is_empty());
    assert!(!tool.steps().contains(&Step::Apply));
    assert_unlocked(&harness, &key).await;
}

#[tokio::test]
async fn plan_skips_the_policy_gate() {
    let harness = Harness::new();
    let tool = harness.tool();
    let engine = harness
        .builder(Arc::new(tool))
        .policy(Arc::new(Deny(vec!["nope".to_string()])))
        .build();

    let outcomes = run(&engine, vec![unit("payments", &["s3"])], Action::Plan).await;

    assert_eq!(outcomes[0].status, UnitStatus::Succeeded);
}

#[tokio::test]
async fn backup_failure_never_runs_the_tool() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let key = ShardKey::generate(&payments);
    harness.objects.seed(key.as_str(), "v1");
    harness.objects.inject_failure("backups/");
    let tool = harness.tool();
    let engine = harness.engine(Arc::new(tool.clone()));

    let outcomes = run(&engine, vec![payments], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::BackupFailed);
    assert!(!tool.steps().contains(&Step::Apply));
    assert_eq!(harness.objects.snapshot(key.as_str()).unwrap(), "v1");
    assert_unlocked(&harness, &key).await;
}

#[tokio::test]
async fn legacy_state_blocks_the_unit_until_migrated() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let legacy = ShardKey::legacy_candidates(&payments)
        .into_iter()
        .find(|k| k.selector() == "general")
        .unwrap();
    harness.objects.seed(legacy.as_str(), "old-layout");
    let tool = harness.tool();
    let engine = harness.engine(Arc::new(tool.clone()));

    let outcomes = run(&engine, vec![payments.clone()], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::PendingMigration);
    assert!(outcomes[0].error.as_deref().unwrap().contains(legacy.as_str()));
    assert!(tool.invocations().is_empty());
    assert_unlocked(&harness, &ShardKey::generate(&payments)).await;
}

#[tokio::test]
async fn legacy_detection_can_be_disabled() {
    let mut harness = Harness::new();
    harness.settings.detect_legacy_shards = false;
    let payments = unit("payments", &["s3"]);
    harness.objects.seed("general/123456789012/us-east-1/payments/state", "old-layout");
    let engine = harness.engine(Arc::new(harness.tool()));

    let outcomes = run(&engine, vec![payments], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::Succeeded);
}

// =============================================================================
// Audit, cancellation, and internal failures
// =============================================================================

#[tokio::test]
async fn audit_failure_is_a_warning_not_a_status_change() {
    let harness = Harness::new();
    harness.objects.inject_failure("audit/");
    let engine = harness.engine(Arc::new(harness.tool()));

    let outcomes = run(&engine, vec![unit("payments", &["s3"])], Action::Apply).await;
    let outcome = &outcomes[0];

    assert_eq!(outcome.status, UnitStatus::Succeeded);
    assert!(outcome.audit_ref.is_none());
    assert!(outcome.audit_missing());
    assert!(outcome.warnings.iter().any(|w| w.kind == WarningKind::AuditMissing));

    let report = RunReport::new(&outcomes, Duration::from_secs(1));
    assert_eq!(report.summary.audit_missing, 1);
    assert_eq!(report.exit_code(true), EXIT_SUCCESS);
}

#[tokio::test]
async fn cancelled_run_reports_every_unit_once() {
    let harness = Harness::new();
    let tool = harness.tool();
    let engine = harness.engine(Arc::new(tool.clone()));
    let units: Vec<_> = (0..6).map(|i| unit(&format!("p{i}"), &["s3"])).collect();

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let outcomes = engine.run(units.clone(), Action::Apply, rx).await;

    assert_eq!(outcomes.len(), units.len());
    for (outcome, unit) in outcomes.iter().zip(&units) {
        assert_eq!(&outcome.unit, unit);
        assert_eq!(outcome.status, UnitStatus::Cancelled);
    }
    assert!(tool.invocations().is_empty());
    assert!(harness.audit_keys().is_empty());
}

#[tokio::test]
async fn cancellation_lets_in_flight_units_finish() {
    let mut harness = Harness::new();
    harness.settings.max_workers = 1;
    let tool = harness
        .tool()
        .with_delay(Duration::from_millis(200))
        .writes_state(Step::Apply, "applied");
    let engine = harness.engine(Arc::new(tool));
    let units: Vec<_> = (0..3).map(|i| unit(&format!("p{i}"), &["s3"])).collect();

    let (tx, rx) = watch::channel(false);
    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tx
    });
    let outcomes = engine.run(units, Action::Apply, rx).await;
    drop(cancel.await.unwrap());

    assert_eq!(outcomes[0].status, UnitStatus::Succeeded);
    assert_eq!(outcomes[1].status, UnitStatus::Cancelled);
    assert_eq!(outcomes[2].status, UnitStatus::Cancelled);
    let report = RunReport::new(&outcomes, Duration::from_secs(1));
    assert_eq!(report.summary.cancelled, 2);
    assert_eq!(report.exit_code(false), EXIT_FAILED);
}

struct PanickingTool;

#[async_trait]
impl IacTool for PanickingTool {
    async fn run(&self, _invocation: &Invocation) -> ToolOutput {
        panic!("tool exploded");
    }
}

#[tokio::test]
async fn panic_inside_unit_releases_lock_and_fails_unit() {
    let harness = Harness::new();
    let payments = unit("payments", &["s3"]);
    let engine = harness.engine(Arc::new(PanickingTool));

    let outcomes = run(&engine, vec![payments.clone()], Action::Apply).await;

    assert_eq!(outcomes[0].status, UnitStatus::Failed);
    assert!(outcomes[0].error.as_deref().unwrap().contains("panicked"));
    assert_unlocked(&harness, &ShardKey::generate(&payments)).await;
}

#[tokio::test]
async fn empty_run_returns_no_outcomes() {
    let harness = Harness::new();
    let engine = harness.engine(Arc::new(harness.tool()));
    assert!(run(&engine, Vec::new(), Action::Apply).await.is_empty());
}
