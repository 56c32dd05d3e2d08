//! End-to-end job lifecycle tests against in-memory adapters and the
//! in-memory ledger.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use warden_executor::{
    Adapter, AdapterError, AdapterRegistry, AdapterResponse, Governance, StepExecutor,
};
use warden_ledger::{MemoryLedger, ReceiptLedger};
use warden_policy::{PolicyConfig, PolicyGate, SpendCaps};
use warden_runner::{Orchestrator, RunnerError, SubmitOptions};
use warden_types::{JobStatus, NodeId, ReceiptAction, StepStatus};
use warden_workflow::{WorkflowDefinition, WorkflowNode};

struct Echo(&'static str);

#[async_trait]
impl Adapter for Echo {
    fn capability(&self) -> &str {
        self.0
    }

    async fn execute(
        &self,
        action: &str,
        params: &Value,
        _governance: &Governance,
    ) -> Result<AdapterResponse, AdapterError> {
        Ok(AdapterResponse {
            success: true,
            data: json!({"status": "ok", "action": action, "params": params}),
            cost: 0.1,
            duration_ms: 1,
        })
    }
}

struct Unstable;

#[async_trait]
impl Adapter for Unstable {
    fn capability(&self) -> &str {
        "unstable"
    }

    async fn execute(
        &self,
        _action: &str,
        _params: &Value,
        _governance: &Governance,
    ) -> Result<AdapterResponse, AdapterError> {
        Err(AdapterError::Permanent("backend rejected the request".into()))
    }
}

/// Blocks its first invocation until released, so tests can hold a job
/// mid-step deterministically.
struct GateFirst {
    first: AtomicBool,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Adapter for GateFirst {
    fn capability(&self) -> &str {
        "gated"
    }

    async fn execute(
        &self,
        _action: &str,
        _params: &Value,
        _governance: &Governance,
    ) -> Result<AdapterResponse, AdapterError> {
        if self.first.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(AdapterResponse::ok(json!({"status": "ok"})))
    }
}

fn harness(config: PolicyConfig) -> (Orchestrator, Arc<MemoryLedger>) {
    harness_with(config, AdapterRegistry::new())
}

fn harness_with(
    config: PolicyConfig,
    mut registry: AdapterRegistry,
) -> (Orchestrator, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let gate = Arc::new(PolicyGate::new(config, ledger.clone()));
    registry.register(Arc::new(Echo("records")));
    registry.register(Arc::new(Echo("messaging")));
    registry.register(Arc::new(Unstable));
    let executor = Arc::new(StepExecutor::new(gate, ledger.clone(), Arc::new(registry)));
    (Orchestrator::new(executor, ledger.clone()), ledger)
}

fn permissive() -> PolicyConfig {
    PolicyConfig {
        approval_threshold: 1000.0,
        ..PolicyConfig::default()
    }
}

fn actions(receipts: &[warden_types::Receipt]) -> Vec<ReceiptAction> {
    receipts.iter().map(|r| r.action.clone()).collect()
}

#[tokio::test]
async fn test_sequential_job_runs_to_completion() {
    let (orchestrator, _ledger) = harness(permissive());
    let definition = WorkflowDefinition::new("seq", "Fetch then notify")
        .with_uses(["records", "messaging"])
        .add_node(WorkflowNode::new("fetch", "records", "read"))
        .add_node(WorkflowNode::new("notify", "messaging", "send"));

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();
    let state = orchestrator.wait(&job).await.unwrap();

    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.history.len(), 2);
    assert!(state.history.iter().all(|r| r.status == StepStatus::Completed));

    let receipts = orchestrator.receipts(&job).await.unwrap();
    assert_eq!(
        actions(&receipts),
        vec![
            ReceiptAction::JobSubmitted,
            ReceiptAction::PolicyEvaluated,
            ReceiptAction::StepCompleted,
            ReceiptAction::PolicyEvaluated,
            ReceiptAction::StepCompleted,
            ReceiptAction::JobCompleted,
        ]
    );
}

#[tokio::test]
async fn test_parallel_branches_both_get_receipts() {
    let (orchestrator, _ledger) = harness(permissive());
    let definition = WorkflowDefinition::new("fanout", "Fan out")
        .with_uses(["records"])
        .add_node(WorkflowNode::new("seed", "records", "read"))
        .add_node(
            WorkflowNode::new("left", "records", "transform")
                .with_depends_on([NodeId::new("seed")]),
        )
        .add_node(
            WorkflowNode::new("right", "records", "transform")
                .with_depends_on([NodeId::new("seed")]),
        );

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();
    let state = orchestrator.wait(&job).await.unwrap();

    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.history.len(), 3);

    let receipts = orchestrator.receipts(&job).await.unwrap();
    let completed = receipts
        .iter()
        .filter(|r| r.action == ReceiptAction::StepCompleted)
        .count();
    let job_completed = receipts
        .iter()
        .filter(|r| r.action == ReceiptAction::JobCompleted)
        .count();
    assert_eq!(completed, 3);
    assert_eq!(job_completed, 1);
}

#[tokio::test]
async fn test_cap_block_parks_job_until_an_operator_acts() {
    let config = PolicyConfig {
        approval_threshold: 1000.0,
        global_caps: SpendCaps {
            daily: Some(100.0),
            weekly: None,
            monthly: None,
        },
        ..PolicyConfig::default()
    };
    let (orchestrator, _ledger) = harness(config);
    let definition = WorkflowDefinition::new("pricey", "Over budget")
        .with_uses(["records"])
        .add_node(WorkflowNode::new("bulk", "records", "export").with_estimated_cost(150.0));

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();

    let mut waiting = false;
    for _ in 0..200 {
        if orchestrator.status(&job).unwrap().status == JobStatus::WaitingHuman {
            waiting = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(waiting, "cap block never parked the job");

    let state = orchestrator.status(&job).unwrap();
    let blocked = state.blocked_on.expect("blocked_on carries the decision");
    assert_eq!(blocked["decision"], json!("block"));
    assert!(blocked["reason"].as_str().unwrap().contains("daily cap"));

    // The block decision is on the ledger; no step receipt follows it
    // and the job is not terminal.
    let receipts = orchestrator.receipts(&job).await.unwrap();
    assert_eq!(
        actions(&receipts),
        vec![ReceiptAction::JobSubmitted, ReceiptAction::PolicyEvaluated]
    );
    assert_eq!(receipts[1].result["decision"]["decision"], json!("block"));

    // A resume re-evaluates through the gate; the cap is still
    // exhausted, so the job parks again instead of failing.
    orchestrator.resume(&job).unwrap();
    let mut reparked = false;
    for _ in 0..200 {
        let receipts = orchestrator.receipts(&job).await.unwrap();
        let evaluations = receipts
            .iter()
            .filter(|r| r.action == ReceiptAction::PolicyEvaluated)
            .count();
        if evaluations == 2 && orchestrator.status(&job).unwrap().status == JobStatus::WaitingHuman
        {
            reparked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(reparked, "resumed job did not re-evaluate and park again");
}

#[tokio::test]
async fn test_branch_receipts_land_in_completion_order() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(GateFirst {
        first: AtomicBool::new(true),
        entered: entered.clone(),
        release: release.clone(),
    }));
    let (orchestrator, _ledger) = harness_with(permissive(), registry);

    let definition = WorkflowDefinition::new("race", "Two branches")
        .with_uses(["records", "gated"])
        .add_node(WorkflowNode::new("seed", "records", "read"))
        .add_node(
            WorkflowNode::new("slow", "gated", "work").with_depends_on([NodeId::new("seed")]),
        )
        .add_node(
            WorkflowNode::new("quick", "records", "read").with_depends_on([NodeId::new("seed")]),
        );

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();

    // Hold the slow branch mid-step until the quick branch's receipt
    // is on the ledger.
    entered.notified().await;
    let mut quick_done = false;
    for _ in 0..200 {
        let receipts = orchestrator.receipts(&job).await.unwrap();
        if receipts.iter().any(|r| {
            r.action == ReceiptAction::StepCompleted && r.result["node_id"] == json!("quick")
        }) {
            quick_done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(quick_done, "quick branch never finished while slow was held");
    release.notify_one();

    let state = orchestrator.wait(&job).await.unwrap();
    assert_eq!(state.status, JobStatus::Completed);

    // Receipts land in completion order, not declaration order.
    let receipts = orchestrator.receipts(&job).await.unwrap();
    let completed: Vec<&str> = receipts
        .iter()
        .filter(|r| r.action == ReceiptAction::StepCompleted)
        .map(|r| r.result["node_id"].as_str().unwrap())
        .collect();
    assert_eq!(completed, vec!["seed", "quick", "slow"]);
}

#[tokio::test]
async fn test_high_risk_step_waits_then_completes_after_approval() {
    let config = PolicyConfig {
        approval_threshold: 1000.0,
        high_risk: vec!["messaging".to_string()],
        ..PolicyConfig::default()
    };
    let (orchestrator, _ledger) = harness(config);
    let definition = WorkflowDefinition::new("risky", "Announce")
        .with_uses(["messaging"])
        .add_node(WorkflowNode::new("announce", "messaging", "broadcast"));

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();

    let mut waiting = false;
    for _ in 0..200 {
        if orchestrator.status(&job).unwrap().status == JobStatus::WaitingHuman {
            waiting = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(waiting, "job never reached waiting-human");

    orchestrator
        .approve(&job, &NodeId::new("announce"), "appr-42")
        .unwrap();
    let state = orchestrator.wait(&job).await.unwrap();

    assert_eq!(state.status, JobStatus::Completed);
    let receipts = orchestrator.receipts(&job).await.unwrap();
    let evaluations = receipts
        .iter()
        .filter(|r| r.action == ReceiptAction::PolicyEvaluated)
        .count();
    assert_eq!(evaluations, 2);
    assert!(receipts
        .iter()
        .any(|r| r.action == ReceiptAction::StepCompleted));
}

#[tokio::test]
async fn test_pause_takes_effect_at_step_boundary() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(GateFirst {
        first: AtomicBool::new(true),
        entered: entered.clone(),
        release: release.clone(),
    }));
    let (orchestrator, _ledger) = harness_with(permissive(), registry);

    let definition = WorkflowDefinition::new("long", "Three steps")
        .with_uses(["gated"])
        .add_node(WorkflowNode::new("one", "gated", "work"))
        .add_node(WorkflowNode::new("two", "gated", "work"))
        .add_node(WorkflowNode::new("three", "gated", "work"));

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();

    // The first step is in flight; the pause must not interrupt it.
    entered.notified().await;
    orchestrator.pause(&job).unwrap();
    release.notify_one();

    let mut paused = false;
    for _ in 0..200 {
        if orchestrator.status(&job).unwrap().status == JobStatus::Paused {
            paused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(paused, "job never paused");
    assert_eq!(orchestrator.status(&job).unwrap().history.len(), 1);

    orchestrator.resume(&job).unwrap();
    let state = orchestrator.wait(&job).await.unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.history.len(), 3);
}

#[tokio::test]
async fn test_when_mismatch_skips_and_takes_failure_edge() {
    let (orchestrator, _ledger) = harness(permissive());
    let definition = WorkflowDefinition::new("cond", "Conditional")
        .with_uses(["records", "messaging"])
        .add_node(WorkflowNode::new("fetch", "records", "read"))
        .add_node(
            WorkflowNode::new("celebrate", "messaging", "send")
                .with_when("fetch", "status", json!("everything-is-great"))
                .with_on_failure("escalate"),
        )
        .add_node(WorkflowNode::new("escalate", "messaging", "send"));

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();
    let state = orchestrator.wait(&job).await.unwrap();

    assert_eq!(state.status, JobStatus::Completed);
    let statuses: Vec<(String, StepStatus)> = state
        .history
        .iter()
        .map(|r| (r.node_id.to_string(), r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("fetch".to_string(), StepStatus::Completed),
            ("celebrate".to_string(), StepStatus::Skipped),
            ("escalate".to_string(), StepStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn test_failed_step_without_edge_fails_job() {
    let (orchestrator, _ledger) = harness(permissive());
    let definition = WorkflowDefinition::new("doomed", "Doomed")
        .with_uses(["unstable"])
        .add_node(WorkflowNode::new("push", "unstable", "sync"));

    let job = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap();
    let state = orchestrator.wait(&job).await.unwrap();

    assert_eq!(state.status, JobStatus::Failed);
    assert!(state.blocked_on.is_some());

    let receipts = orchestrator.receipts(&job).await.unwrap();
    let failed = receipts
        .iter()
        .find(|r| r.action == ReceiptAction::StepFailed)
        .expect("step failure receipt");
    assert!(receipts.iter().any(|r| r.action == ReceiptAction::JobFailed));

    // The failed history entry links back to its ledger receipt.
    assert_eq!(state.history[0].status, StepStatus::Failed);
    assert_eq!(state.history[0].receipt_id.as_ref(), Some(&failed.id));
}

#[tokio::test]
async fn test_rejected_definition_writes_nothing_to_the_ledger() {
    let (orchestrator, ledger) = harness(permissive());
    let definition = WorkflowDefinition::new("bad", "Dangling")
        .with_uses(["records"])
        .add_node(WorkflowNode::new("a", "records", "read").with_on_success("missing"));

    let err = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::Validation(_)));
    assert_eq!(ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unregistered_capability_rejected_before_ledger() {
    let (orchestrator, ledger) = harness(permissive());
    let definition = WorkflowDefinition::new("nocap", "No adapter")
        .with_uses(["browser"])
        .add_node(WorkflowNode::new("surf", "browser", "navigate"));

    let err = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap_err();
    match err {
        RunnerError::MissingCapabilities(missing) => assert_eq!(missing, vec!["browser"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_secret_rejected_before_ledger() {
    let (orchestrator, ledger) = harness(permissive());
    let mut definition = WorkflowDefinition::new("secretive", "Needs token")
        .with_uses(["records"])
        .add_node(WorkflowNode::new("fetch", "records", "read"));
    definition.required_secrets.push(warden_workflow::RequiredSecret {
        name: "WARDEN_TEST_SECRET_THAT_DOES_NOT_EXIST".to_string(),
        source: "env".to_string(),
        notes: String::new(),
    });

    let err = orchestrator
        .submit(definition, SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::MissingSecret(_)));
    assert_eq!(ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_vars_are_rendered_into_step_args() {
    let (orchestrator, _ledger) = harness(permissive());
    let definition = WorkflowDefinition::new("templated", "Templated")
        .with_uses(["messaging"])
        .add_node(
            WorkflowNode::new("post", "messaging", "send")
                .with_args(json!({"channel": "{{vars.channel}}"})),
        );

    let options = SubmitOptions::default().with_var("channel", json!("#alerts"));
    let job = orchestrator.submit(definition, options).await.unwrap();
    let state = orchestrator.wait(&job).await.unwrap();
    assert_eq!(state.status, JobStatus::Completed);

    let output = state.history[0].output.as_ref().unwrap();
    assert_eq!(output["params"]["channel"], json!("#alerts"));
}
