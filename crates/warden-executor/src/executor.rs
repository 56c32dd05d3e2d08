//! The step execution loop: authorize, snapshot, attempt, record.

use crate::{
    AdapterError, AdapterRegistry, AdapterResponse, ExecutorError, Governance, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use warden_evidence::{rollup, ArtifactRef, ArtifactStore, EvidenceError};
use warden_ledger::ReceiptLedger;
use warden_policy::PolicyGate;
use warden_types::{Decision, JobId, NodeId, ReceiptAction, ReceiptDraft, ReceiptId, ToolCall};

/// Everything the executor needs to run one step. The runner builds
/// one of these from a workflow node plus job context.
#[derive(Clone, Debug)]
pub struct StepSpec {
    pub node_id: NodeId,
    pub tool: String,
    pub action: String,
    pub args: Value,
    pub estimated_cost: f64,
    pub approval_id: Option<String>,
    /// Stable key for replay detection. `None` disables deduplication.
    pub idempotency_key: Option<String>,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_ms: Option<u64>,
    /// Local file to snapshot into the evidence store before the first
    /// attempt mutates it.
    pub resource: Option<String>,
}

impl StepSpec {
    pub fn new(
        node_id: impl Into<String>,
        tool: impl Into<String>,
        action: impl Into<String>,
        args: Value,
    ) -> Self {
        Self {
            node_id: NodeId::new(node_id),
            tool: tool.into(),
            action: action.into(),
            args,
            estimated_cost: 0.0,
            approval_id: None,
            idempotency_key: None,
            max_attempts: 1,
            backoff_ms: 0,
            timeout_ms: None,
            resource: None,
        }
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_approval(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Outcome of a successfully executed step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    pub node_id: NodeId,
    pub receipt_id: ReceiptId,
    pub output: Value,
    pub attempts: u32,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<ArtifactRef>,
    /// True when the result came from the idempotency index instead of
    /// a fresh execution.
    #[serde(default)]
    pub replayed: bool,
}

/// Runs individual steps end to end: policy check, evidence snapshot,
/// bounded retries, and exactly one terminal receipt per execution.
pub struct StepExecutor {
    gate: Arc<PolicyGate>,
    ledger: Arc<dyn ReceiptLedger>,
    registry: Arc<AdapterRegistry>,
    artifacts: Option<Arc<ArtifactStore>>,
    // Completed-step index keyed by idempotency key. A replay hit
    // returns the recorded result without touching the gate, the
    // adapter, or the ledger.
    completed: Mutex<HashMap<String, StepResult>>,
}

impl StepExecutor {
    pub fn new(
        gate: Arc<PolicyGate>,
        ledger: Arc<dyn ReceiptLedger>,
        registry: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            gate,
            ledger,
            registry,
            artifacts: None,
            completed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_artifact_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Execute one step for `job_id`.
    ///
    /// Exactly one terminal receipt (`StepCompleted` or `StepFailed`)
    /// is appended per execution, tagged with the attempt count. A
    /// replayed idempotency key appends nothing.
    pub async fn run_step(&self, job_id: &JobId, spec: &StepSpec) -> Result<StepResult> {
        if let Some(key) = &spec.idempotency_key {
            if let Some(hit) = self.lookup_completed(key).await? {
                tracing::info!(node = %spec.node_id, key = %key, "idempotent replay, skipping execution");
                let mut result = hit;
                result.replayed = true;
                return Ok(result);
            }
        }

        let mut call = ToolCall::new(
            spec.node_id.clone(),
            &spec.tool,
            &spec.action,
            spec.args.clone(),
        )
        .with_estimated_cost(spec.estimated_cost);
        if let Some(key) = &spec.idempotency_key {
            call = call.with_idempotency_key(key.clone());
        }
        if let Some(approval) = &spec.approval_id {
            call = call.with_approval(approval.clone());
        }

        let decision = self.gate.evaluate_and_record(&call, Some(job_id)).await?;
        match decision.decision {
            Decision::Allow => {}
            Decision::Block => return Err(ExecutorError::Blocked { decision }),
            Decision::RequireApproval => {
                return Err(ExecutorError::AwaitingApproval { decision })
            }
        }

        let Some(adapter) = self.registry.get(&spec.tool) else {
            let receipt_id = self
                .record_failure(job_id, &call, 0, "no adapter registered for capability")
                .await?;
            return Err(ExecutorError::StepFailed {
                node_id: spec.node_id.clone(),
                attempts: 0,
                receipt_id,
                detail: format!("no adapter registered for capability '{}'", spec.tool),
            });
        };

        let evidence = self.snapshot_resource(job_id, spec)?;
        let governance = Governance::new(call.idempotency_key.clone(), spec.approval_id.clone());

        let mut attempt = 0u32;
        let outcome: std::result::Result<AdapterResponse, String> = loop {
            attempt += 1;
            let fut = adapter.execute(&spec.action, &spec.args, &governance);
            let result = match spec.timeout_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), fut).await {
                    Ok(inner) => inner,
                    Err(_) => Err(AdapterError::Transient(format!("timed out after {ms}ms"))),
                },
                None => fut.await,
            };

            match result {
                Ok(response) if response.success => break Ok(response),
                Ok(response) => break Err(format!("adapter reported failure: {}", response.data)),
                Err(err) if err.is_transient() && attempt < spec.max_attempts => {
                    tracing::warn!(
                        node = %spec.node_id,
                        attempt,
                        max_attempts = spec.max_attempts,
                        error = %err,
                        "transient failure, retrying"
                    );
                    if spec.backoff_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(
                            spec.backoff_ms * u64::from(attempt),
                        ))
                        .await;
                    }
                }
                Err(err) => break Err(err.to_string()),
            }
        };

        match outcome {
            Ok(response) => {
                let result = self
                    .record_success(job_id, &call, spec, attempt, response, evidence)
                    .await?;
                if let Some(key) = &spec.idempotency_key {
                    self.completed.lock().insert(key.clone(), result.clone());
                }
                Ok(result)
            }
            Err(detail) => {
                let receipt_id = self.record_failure(job_id, &call, attempt, &detail).await?;
                tracing::error!(node = %spec.node_id, attempts = attempt, detail = %detail, "step failed");
                Err(ExecutorError::StepFailed {
                    node_id: spec.node_id.clone(),
                    attempts: attempt,
                    receipt_id,
                    detail,
                })
            }
        }
    }

    /// Check the in-memory index first, then fall back to the ledger,
    /// so replay detection survives a fresh executor opened over an
    /// existing chain. A ledger hit is rehydrated into the index.
    async fn lookup_completed(&self, key: &str) -> Result<Option<StepResult>> {
        if let Some(hit) = self.completed.lock().get(key) {
            return Ok(Some(hit.clone()));
        }

        for receipt in self.ledger.all().await?.iter().rev() {
            if receipt.action != ReceiptAction::StepCompleted {
                continue;
            }
            if receipt.result.get("idempotency_key").and_then(Value::as_str) != Some(key) {
                continue;
            }
            let result = StepResult {
                node_id: NodeId::new(receipt.result["node_id"].as_str().unwrap_or_default()),
                receipt_id: receipt.id.clone(),
                output: receipt.result.get("output").cloned().unwrap_or(Value::Null),
                attempts: receipt
                    .result
                    .get("attempts")
                    .and_then(Value::as_u64)
                    .unwrap_or(1) as u32,
                cost: receipt.result.get("cost").and_then(Value::as_f64).unwrap_or(0.0),
                evidence: receipt
                    .result
                    .get("evidence")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                replayed: false,
            };
            self.completed.lock().insert(key.to_string(), result.clone());
            return Ok(Some(result));
        }
        Ok(None)
    }

    fn snapshot_resource(&self, job_id: &JobId, spec: &StepSpec) -> Result<Vec<ArtifactRef>> {
        let (Some(resource), Some(store)) = (&spec.resource, &self.artifacts) else {
            return Ok(Vec::new());
        };

        let bytes = std::fs::read(resource).map_err(EvidenceError::from)?;
        let name = std::path::Path::new(resource)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "resource".to_string());
        let artifact = store.write(
            &format!("{job_id}/{}/pre-{name}", spec.node_id),
            &bytes,
            "application/octet-stream",
        )?;
        Ok(vec![artifact])
    }

    async fn record_success(
        &self,
        job_id: &JobId,
        call: &ToolCall,
        spec: &StepSpec,
        attempts: u32,
        response: AdapterResponse,
        evidence: Vec<ArtifactRef>,
    ) -> Result<StepResult> {
        let evidence_rollup = if evidence.is_empty() {
            None
        } else {
            let hashes: Vec<&str> = evidence.iter().map(|a| a.sha256.as_str()).collect();
            Some(rollup(&hashes))
        };

        let draft = ReceiptDraft::new(
            "executor",
            ReceiptAction::StepCompleted,
            json!({
                "node_id": spec.node_id,
                "idempotency_key": spec.idempotency_key,
                "attempts": attempts,
                "output": response.data,
                "cost": response.cost,
                "duration_ms": response.duration_ms,
                "evidence": evidence,
                "evidence_rollup": evidence_rollup,
            }),
        )
        .for_tool_call(call.id.clone())
        .for_job(job_id.clone());
        let receipt = self.ledger.append(draft).await?;

        tracing::info!(
            node = %spec.node_id,
            attempts,
            receipt = %receipt.id,
            "step completed"
        );

        Ok(StepResult {
            node_id: spec.node_id.clone(),
            receipt_id: receipt.id,
            output: response.data,
            attempts,
            cost: response.cost,
            evidence,
            replayed: false,
        })
    }

    async fn record_failure(
        &self,
        job_id: &JobId,
        call: &ToolCall,
        attempts: u32,
        detail: &str,
    ) -> Result<ReceiptId> {
        let draft = ReceiptDraft::new(
            "executor",
            ReceiptAction::StepFailed,
            json!({
                "node_id": call.step_id,
                "attempts": attempts,
                "error": detail,
            }),
        )
        .for_tool_call(call.id.clone())
        .for_job(job_id.clone());
        let receipt = self.ledger.append(draft).await?;
        Ok(receipt.id)
    }
}
