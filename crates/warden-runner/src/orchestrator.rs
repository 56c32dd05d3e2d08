//! The orchestrator: one owning task per job, a control channel in,
//! status snapshots out.

use crate::{reconstruct, Result, RunnerError};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use warden_executor::{ExecutorError, StepExecutor, StepResult, StepSpec};
use warden_ledger::ReceiptLedger;
use warden_types::{
    JobId, JobState, JobStatus, NodeId, PolicyDecision, Receipt, ReceiptAction, ReceiptDraft,
    ReceiptId, StepRecord, StepStatus,
};
use warden_workflow::{validate, Scheduling, WorkflowDefinition, WorkflowNode};

/// Per-submission options.
#[derive(Clone, Debug, Default)]
pub struct SubmitOptions {
    /// Variable overrides, merged over the definition's `vars`.
    pub vars: HashMap<String, Value>,
}

impl SubmitOptions {
    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }
}

enum Control {
    Pause,
    Resume,
    Approve { node: NodeId, approval_id: String },
}

struct JobEntry {
    state: Arc<RwLock<JobState>>,
    control: mpsc::UnboundedSender<Control>,
    done: watch::Receiver<bool>,
}

/// Accepts definitions, spawns one driver task per job, and routes
/// control operations to it. All JobState mutations happen inside the
/// driver; everything else reads snapshots.
pub struct Orchestrator {
    executor: Arc<StepExecutor>,
    ledger: Arc<dyn ReceiptLedger>,
    max_parallel: usize,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl Orchestrator {
    pub fn new(executor: Arc<StepExecutor>, ledger: Arc<dyn ReceiptLedger>) -> Self {
        Self {
            executor,
            ledger,
            max_parallel: 4,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Bound on concurrently running steps of one job's graph.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Validate and start a job. Nothing is written to the ledger for
    /// a rejected definition; an accepted one gets a `JobSubmitted`
    /// receipt before its first step runs.
    pub async fn submit(
        &self,
        definition: WorkflowDefinition,
        options: SubmitOptions,
    ) -> Result<JobId> {
        validate(&definition).map_err(RunnerError::Validation)?;

        let missing = self
            .executor
            .registry()
            .missing_capabilities(&definition.uses);
        if !missing.is_empty() {
            return Err(RunnerError::MissingCapabilities(missing));
        }

        // Secret values are never read here; presence is the contract.
        for secret in &definition.required_secrets {
            if secret.source == "env" && std::env::var(&secret.name).is_err() {
                return Err(RunnerError::MissingSecret(secret.name.clone()));
            }
        }

        let mut vars = definition.vars.clone();
        vars.extend(options.vars);

        let state = JobState::new(definition.id.clone());
        let job_id = state.id.clone();

        self.ledger
            .append(
                ReceiptDraft::new(
                    "orchestrator",
                    ReceiptAction::JobSubmitted,
                    json!({
                        "definition_id": definition.id,
                        "name": definition.name,
                        "version": definition.version,
                        "nodes": definition.nodes.len(),
                    }),
                )
                .for_job(job_id.clone()),
            )
            .await?;

        tracing::info!(job = %job_id, definition = %definition.id, "job submitted");

        let shared = Arc::new(RwLock::new(state));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);

        let driver = JobDriver {
            job_id: job_id.clone(),
            definition,
            vars,
            executor: self.executor.clone(),
            ledger: self.ledger.clone(),
            state: shared.clone(),
            control: control_rx,
            approvals: HashMap::new(),
            max_parallel: self.max_parallel,
            paused: false,
        };
        tokio::spawn(driver.run(done_tx));

        self.jobs.lock().insert(
            job_id.clone(),
            JobEntry {
                state: shared,
                control: control_tx,
                done: done_rx,
            },
        );
        Ok(job_id)
    }

    /// Request a pause; takes effect at the next step boundary.
    pub fn pause(&self, job: &JobId) -> Result<()> {
        self.send(job, Control::Pause)
    }

    pub fn resume(&self, job: &JobId) -> Result<()> {
        self.send(job, Control::Resume)
    }

    /// Attach an approval token to a node and wake the job if it is
    /// waiting on that node.
    pub fn approve(
        &self,
        job: &JobId,
        node: &NodeId,
        approval_id: impl Into<String>,
    ) -> Result<()> {
        self.send(
            job,
            Control::Approve {
                node: node.clone(),
                approval_id: approval_id.into(),
            },
        )
    }

    /// A point-in-time snapshot of the job's state.
    pub fn status(&self, job: &JobId) -> Result<JobState> {
        let jobs = self.jobs.lock();
        let entry = jobs.get(job).ok_or_else(|| RunnerError::UnknownJob(job.clone()))?;
        let state = entry.state.read().clone();
        Ok(state)
    }

    /// All ledger receipts recorded for this job, in append order.
    pub async fn receipts(&self, job: &JobId) -> Result<Vec<Receipt>> {
        if !self.jobs.lock().contains_key(job) {
            return Err(RunnerError::UnknownJob(job.clone()));
        }
        Ok(self.ledger.query(job).await?)
    }

    /// Wait until the job's driver task has finished, then return the
    /// final state. Note a paused or waiting-human job does not finish
    /// until resumed or approved.
    pub async fn wait(&self, job: &JobId) -> Result<JobState> {
        let mut done = {
            let jobs = self.jobs.lock();
            let entry = jobs.get(job).ok_or_else(|| RunnerError::UnknownJob(job.clone()))?;
            entry.done.clone()
        };
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
        self.status(job)
    }

    fn send(&self, job: &JobId, control: Control) -> Result<()> {
        let jobs = self.jobs.lock();
        let entry = jobs.get(job).ok_or_else(|| RunnerError::UnknownJob(job.clone()))?;
        if entry.state.read().status.is_terminal() {
            return Err(RunnerError::Terminal(job.clone()));
        }
        entry
            .control
            .send(control)
            .map_err(|_| RunnerError::Terminal(job.clone()))
    }
}

enum JobOutcome {
    Completed,
    Failed(Value),
    /// The control surface disappeared while the job was parked.
    Abandoned,
}

enum NodeOutcome {
    Completed(StepResult),
    Failed {
        attempts: u32,
        receipt_id: Option<ReceiptId>,
        detail: String,
    },
    Abandoned,
}

/// The single writer for one job. Owns the definition, the control
/// receiver, and the only mutable handle over JobState.
struct JobDriver {
    job_id: JobId,
    definition: WorkflowDefinition,
    vars: HashMap<String, Value>,
    executor: Arc<StepExecutor>,
    ledger: Arc<dyn ReceiptLedger>,
    state: Arc<RwLock<JobState>>,
    control: mpsc::UnboundedReceiver<Control>,
    approvals: HashMap<NodeId, String>,
    max_parallel: usize,
    paused: bool,
}

impl JobDriver {
    async fn run(mut self, done: watch::Sender<bool>) {
        let outcome = match self.definition.scheduling() {
            Scheduling::Sequential => self.drive_sequential().await,
            Scheduling::Graph => self.drive_graph().await,
        };

        match outcome {
            JobOutcome::Completed => {
                let steps = self.state.read().history.len();
                self.finish(JobStatus::Completed, ReceiptAction::JobCompleted, json!({"steps": steps}))
                    .await;
            }
            JobOutcome::Failed(detail) => {
                self.state.write().blocked_on = Some(detail.clone());
                self.finish(JobStatus::Failed, ReceiptAction::JobFailed, detail)
                    .await;
            }
            JobOutcome::Abandoned => {}
        }
        let _ = done.send(true);
    }

    async fn finish(&mut self, status: JobStatus, action: ReceiptAction, result: Value) {
        {
            let mut st = self.state.write();
            st.current_step_id = None;
            st.set_status(status);
        }
        let draft = ReceiptDraft::new("orchestrator", action, result).for_job(self.job_id.clone());
        if let Err(err) = self.ledger.append(draft).await {
            tracing::error!(job = %self.job_id, error = %err, "failed to append job receipt");
        }
        tracing::info!(job = %self.job_id, status = ?status, "job finished");
    }

    async fn drive_sequential(&mut self) -> JobOutcome {
        let mut cursor = self.definition.nodes.first().map(|n| n.id.clone());

        while let Some(node_id) = cursor {
            self.checkpoint().await;
            let Some(node) = self.definition.get_node(&node_id).cloned() else {
                break;
            };
            self.state.write().current_step_id = Some(node.id.clone());

            if !self.condition_met(&node) {
                tracing::info!(job = %self.job_id, node = %node.id, "condition not met, skipping");
                self.state.write().push_record(StepRecord::skipped(node.id.clone()));
                // A skipped node routes its dependents down the failure
                // edge; with no edge the conditional tail simply does
                // not run.
                cursor = node.on_failure.clone();
                continue;
            }

            match self.execute_node(&node).await {
                NodeOutcome::Completed(result) => {
                    self.record_completed(&node.id, &result);
                    cursor = node.on_success.clone().or_else(|| {
                        self.definition
                            .successor_of(&node.id)
                            .map(|n| n.id.clone())
                    });
                }
                NodeOutcome::Failed {
                    attempts,
                    receipt_id,
                    detail,
                } => {
                    self.record_failed(&node.id, attempts, receipt_id);
                    match node.on_failure.clone() {
                        Some(next) => cursor = Some(next),
                        None => {
                            return JobOutcome::Failed(
                                json!({"node_id": node.id, "error": detail}),
                            )
                        }
                    }
                }
                NodeOutcome::Abandoned => return JobOutcome::Abandoned,
            }
        }
        JobOutcome::Completed
    }

    async fn drive_graph(&mut self) -> JobOutcome {
        let mut pending: Vec<NodeId> = {
            let st = self.state.read();
            reconstruct(&self.definition, &st.history)
        };
        let mut tasks: JoinSet<(NodeId, std::result::Result<StepResult, ExecutorError>)> =
            JoinSet::new();
        let mut running: HashSet<NodeId> = HashSet::new();
        let mut any_failed = false;

        loop {
            self.checkpoint().await;

            let mut i = 0;
            while i < pending.len() && running.len() < self.max_parallel {
                let node_id = pending[i].clone();
                let Some(node) = self.definition.get_node(&node_id).cloned() else {
                    pending.remove(i);
                    continue;
                };

                let deps_done = {
                    let st = self.state.read();
                    node.depends_on.iter().all(|d| st.is_completed(d))
                };
                if !deps_done {
                    i += 1;
                    continue;
                }

                pending.remove(i);
                if !self.condition_met(&node) {
                    tracing::info!(job = %self.job_id, node = %node.id, "condition not met, skipping");
                    self.state.write().push_record(StepRecord::skipped(node.id.clone()));
                    continue;
                }

                running.insert(node.id.clone());
                let executor = self.executor.clone();
                let job_id = self.job_id.clone();
                let spec = self.spec_for(&node);
                tasks.spawn(async move {
                    let outcome = executor.run_step(&job_id, &spec).await;
                    (spec.node_id, outcome)
                });
                i = 0; // a dispatch may have changed what is ready
            }

            if running.is_empty() {
                // Nothing runnable: either everything is done or the
                // remaining nodes are stranded behind a skipped or
                // failed dependency.
                break;
            }

            match tasks.join_next().await {
                Some(Ok((node_id, outcome))) => {
                    running.remove(&node_id);
                    if let Some(decision) = self.absorb(&node_id, outcome, &mut any_failed) {
                        // Drain in-flight work before parking the job;
                        // waiting-human must not hold worker slots.
                        while let Some(joined) = tasks.join_next().await {
                            if let Ok((other, other_outcome)) = joined {
                                running.remove(&other);
                                if self
                                    .absorb(&other, other_outcome, &mut any_failed)
                                    .is_some()
                                {
                                    pending.push(other);
                                }
                            }
                        }
                        running.clear();
                        if !self.park_for_approval(&node_id, &decision).await {
                            return JobOutcome::Abandoned;
                        }
                        pending.push(node_id);
                    }
                }
                Some(Err(join_err)) => {
                    tracing::error!(job = %self.job_id, error = %join_err, "step task aborted");
                    return JobOutcome::Failed(json!({"error": "step task aborted"}));
                }
                None => break,
            }
        }

        if any_failed {
            return JobOutcome::Failed(json!({"error": "one or more steps failed"}));
        }
        JobOutcome::Completed
    }

    /// Fold one finished step into history. Returns the decision if the
    /// step is waiting on an operator instead of finished.
    fn absorb(
        &mut self,
        node_id: &NodeId,
        outcome: std::result::Result<StepResult, ExecutorError>,
        any_failed: &mut bool,
    ) -> Option<PolicyDecision> {
        match outcome {
            Ok(result) => {
                self.record_completed(node_id, &result);
                None
            }
            Err(ExecutorError::AwaitingApproval { decision })
            | Err(ExecutorError::Blocked { decision }) => Some(decision),
            Err(ExecutorError::StepFailed {
                attempts,
                receipt_id,
                detail,
                ..
            }) => {
                tracing::error!(job = %self.job_id, node = %node_id, detail = %detail, "step failed");
                self.record_failed(node_id, attempts, Some(receipt_id));
                *any_failed = true;
                None
            }
            Err(other) => {
                tracing::error!(job = %self.job_id, node = %node_id, error = %other, "step errored");
                self.record_failed(node_id, 0, None);
                *any_failed = true;
                None
            }
        }
    }

    /// Run one node through the executor, parking whenever the gate
    /// demands an operator (approval or a lifted block).
    async fn execute_node(&mut self, node: &WorkflowNode) -> NodeOutcome {
        loop {
            let spec = self.spec_for(node);
            match self.executor.run_step(&self.job_id, &spec).await {
                Ok(result) => return NodeOutcome::Completed(result),
                Err(ExecutorError::AwaitingApproval { decision })
                | Err(ExecutorError::Blocked { decision }) => {
                    if !self.park_for_approval(&node.id, &decision).await {
                        return NodeOutcome::Abandoned;
                    }
                }
                Err(ExecutorError::StepFailed {
                    attempts,
                    receipt_id,
                    detail,
                    ..
                }) => {
                    return NodeOutcome::Failed {
                        attempts,
                        receipt_id: Some(receipt_id),
                        detail,
                    }
                }
                Err(other) => {
                    return NodeOutcome::Failed {
                        attempts: 0,
                        receipt_id: None,
                        detail: other.to_string(),
                    }
                }
            }
        }
    }

    /// Park as waiting-human until an approval for `node_id` (or an
    /// explicit resume) arrives, then re-evaluate through the gate. A
    /// blocked step (deny list, exhausted cap) parks the same way; a
    /// resume retries it once the operator has lifted the cause.
    /// Returns false if the control surface went away.
    async fn park_for_approval(&mut self, node_id: &NodeId, decision: &PolicyDecision) -> bool {
        {
            let mut st = self.state.write();
            st.blocked_on = serde_json::to_value(decision).ok();
            st.set_status(JobStatus::WaitingHuman);
        }
        tracing::info!(
            job = %self.job_id,
            node = %node_id,
            reason = %decision.reason,
            "waiting for operator approval"
        );

        loop {
            match self.control.recv().await {
                Some(Control::Approve { node, approval_id }) => {
                    let hit = &node == node_id;
                    self.approvals.insert(node, approval_id);
                    if hit {
                        break;
                    }
                }
                // An explicit resume retries without a token; the gate
                // will park the job again if approval is still needed.
                Some(Control::Resume) => break,
                Some(Control::Pause) => {}
                None => return false,
            }
        }

        {
            let mut st = self.state.write();
            st.blocked_on = None;
            st.set_status(JobStatus::Running);
        }
        true
    }

    /// Drain control messages; if a pause is pending, hold here until
    /// resumed. Called at every step boundary, never mid-step.
    async fn checkpoint(&mut self) {
        while let Ok(msg) = self.control.try_recv() {
            self.apply(msg);
        }
        if self.paused {
            self.state.write().set_status(JobStatus::Paused);
            tracing::info!(job = %self.job_id, "job paused at step boundary");
            while self.paused {
                match self.control.recv().await {
                    Some(msg) => self.apply(msg),
                    None => self.paused = false,
                }
            }
            self.state.write().set_status(JobStatus::Running);
            tracing::info!(job = %self.job_id, "job resumed");
        }
    }

    fn apply(&mut self, msg: Control) {
        match msg {
            Control::Pause => self.paused = true,
            Control::Resume => self.paused = false,
            Control::Approve { node, approval_id } => {
                self.approvals.insert(node, approval_id);
            }
        }
    }

    fn condition_met(&self, node: &WorkflowNode) -> bool {
        let Some(when) = &node.when else {
            return true;
        };
        let output = {
            let st = self.state.read();
            st.record_for(&when.source).and_then(|r| r.output.clone())
        };
        output.map(|o| when.matches(&o)).unwrap_or(false)
    }

    fn spec_for(&self, node: &WorkflowNode) -> StepSpec {
        StepSpec {
            node_id: node.id.clone(),
            tool: node.uses.clone(),
            action: node.action.clone(),
            args: render_args(&node.args, &self.vars),
            estimated_cost: node.estimated_cost,
            approval_id: self.approvals.get(&node.id).cloned(),
            idempotency_key: Some(
                node.idempotency_key
                    .clone()
                    .unwrap_or_else(|| format!("{}:{}", self.job_id, node.id)),
            ),
            max_attempts: node.retry.max_attempts.max(1),
            backoff_ms: node.retry.backoff_ms,
            timeout_ms: node.timeout_ms,
            resource: node.resource.clone(),
        }
    }

    fn record_completed(&self, node_id: &NodeId, result: &StepResult) {
        self.state.write().push_record(StepRecord {
            node_id: node_id.clone(),
            status: StepStatus::Completed,
            receipt_id: Some(result.receipt_id.clone()),
            output: Some(result.output.clone()),
            attempts: result.attempts,
            finished_at: Utc::now(),
        });
    }

    fn record_failed(&self, node_id: &NodeId, attempts: u32, receipt_id: Option<ReceiptId>) {
        self.state.write().push_record(StepRecord {
            node_id: node_id.clone(),
            status: StepStatus::Failed,
            receipt_id,
            output: None,
            attempts,
            finished_at: Utc::now(),
        });
    }
}

/// Substitute `{{vars.name}}` placeholders through an args tree. A
/// string that is exactly one placeholder keeps the variable's JSON
/// type; placeholders embedded in longer strings are spliced in as
/// text. Unknown variables are left as written.
fn render_args(value: &Value, vars: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => render_str(s, vars),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_args(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_args(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_str(s: &str, vars: &HashMap<String, Value>) -> Value {
    if let Some(name) = s.strip_prefix("{{vars.").and_then(|r| r.strip_suffix("}}")) {
        if !name.contains('{') && !name.contains('}') {
            if let Some(value) = vars.get(name.trim()) {
                return value.clone();
            }
        }
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{vars.") {
        out.push_str(&rest[..start]);
        let after = &rest[start + "{{vars.".len()..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(Value::String(v)) => out.push_str(v),
                    Some(v) => out.push_str(&v.to_string()),
                    None => out.push_str(&rest[start..start + "{{vars.".len() + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}
