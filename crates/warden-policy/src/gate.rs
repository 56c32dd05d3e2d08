//! The authorization gate.

use crate::{CapWindow, PolicyConfig, Result, SpendTracker};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use warden_ledger::ReceiptLedger;
use warden_types::{Decision, JobId, PolicyDecision, ReceiptAction, ReceiptDraft, ToolCall};

/// Evaluates proposed actions against budget, approval, and risk rules,
/// recording every decision through the ledger before the executor may
/// proceed.
pub struct PolicyGate {
    config: PolicyConfig,
    // Spend mutations happen under this lock, in the same critical
    // section as the decision's ledger append, so counter state is
    // always causally ordered with the receipt that justifies it.
    spend: Mutex<SpendTracker>,
    ledger: Arc<dyn ReceiptLedger>,
}

impl PolicyGate {
    pub fn new(config: PolicyConfig, ledger: Arc<dyn ReceiptLedger>) -> Self {
        Self {
            config,
            spend: Mutex::new(SpendTracker::new()),
            ledger,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate one proposed action and append the decision to the
    /// ledger. Allowed calls are charged against the spend tracker.
    pub async fn evaluate_and_record(
        &self,
        call: &ToolCall,
        job_id: Option<&JobId>,
    ) -> Result<PolicyDecision> {
        let mut spend = self.spend.lock().await;
        let now = Utc::now();

        let (decision, reason) = self.decide(call, &spend);
        let recorded = PolicyDecision::new(decision, reason, call.id.clone());

        let mut draft = ReceiptDraft::new(
            "policy-gate",
            ReceiptAction::PolicyEvaluated,
            json!({
                "decision": recorded,
                "tool": call.tool,
                "action": call.action,
                "step_id": call.step_id,
                "estimated_cost": call.estimated_cost,
            }),
        )
        .for_tool_call(call.id.clone());
        if let Some(job_id) = job_id {
            draft = draft.for_job(job_id.clone());
        }
        self.ledger.append(draft).await?;

        if recorded.is_allow() {
            spend.charge(&call.tool, call.estimated_cost, now);
        }

        tracing::info!(
            tool = %call.tool,
            step = %call.step_id,
            decision = ?recorded.decision,
            reason = %recorded.reason,
            "policy decision recorded"
        );
        Ok(recorded)
    }

    fn decide(&self, call: &ToolCall, spend: &SpendTracker) -> (Decision, String) {
        // Denied tools have no approval path at all.
        if self.config.is_denied(&call.tool) {
            return (
                Decision::Block,
                format!("tool '{}' is on the deny list", call.tool),
            );
        }

        // A high-risk match dominates everything below, including a
        // spend-cap pass and an auto-approve match.
        if self.config.is_high_risk(&call.tool) && call.approval_id.is_none() {
            return (
                Decision::RequireApproval,
                format!("tool '{}' is high-risk and no approval is attached", call.tool),
            );
        }

        if let Some(reason) = self.exceeded_cap(call, spend) {
            return (Decision::Block, reason);
        }

        if self.config.is_auto_approved(&call.tool) {
            return (
                Decision::Allow,
                format!("tool '{}' is auto-approved", call.tool),
            );
        }

        if call.estimated_cost > self.config.approval_threshold {
            return (
                Decision::RequireApproval,
                format!(
                    "estimated cost {} exceeds approval threshold {}",
                    call.estimated_cost, self.config.approval_threshold
                ),
            );
        }

        (Decision::Allow, "within approval threshold".to_string())
    }

    fn exceeded_cap(&self, call: &ToolCall, spend: &SpendTracker) -> Option<String> {
        let now = Utc::now();

        if let Some(caps) = self.config.tool_caps.get(&call.tool) {
            for window in CapWindow::ALL {
                if let Some(cap) = caps.cap_for(window) {
                    let spent = spend.window_total(window, now, Some(&call.tool));
                    if spent + call.estimated_cost > cap {
                        return Some(format!(
                            "{} cap {} for tool '{}' exceeded: {} spent + {} requested",
                            window.label(),
                            cap,
                            call.tool,
                            spent,
                            call.estimated_cost
                        ));
                    }
                }
            }
        }

        for window in CapWindow::ALL {
            if let Some(cap) = self.config.global_caps.cap_for(window) {
                let spent = spend.window_total(window, now, None);
                if spent + call.estimated_cost > cap {
                    return Some(format!(
                        "global {} cap {} exceeded: {} spent + {} requested",
                        window.label(),
                        cap,
                        spent,
                        call.estimated_cost
                    ));
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpendCaps;
    use serde_json::json;
    use warden_ledger::MemoryLedger;
    use warden_types::NodeId;

    fn gate(config: PolicyConfig) -> (PolicyGate, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        (PolicyGate::new(config, ledger.clone()), ledger)
    }

    fn call(tool: &str, cost: f64) -> ToolCall {
        ToolCall::new(NodeId::new("step-1"), tool, "run", json!({}))
            .with_estimated_cost(cost)
    }

    #[tokio::test]
    async fn test_high_risk_requires_approval_regardless_of_spend() {
        let (gate, _) = gate(PolicyConfig {
            approval_threshold: 1_000.0,
            high_risk: vec!["shell".into()],
            auto_approve: vec!["shell".into()],
            ..Default::default()
        });

        let decision = gate
            .evaluate_and_record(&call("shell", 0.0), None)
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::RequireApproval);
    }

    #[tokio::test]
    async fn test_high_risk_with_approval_token_passes_through() {
        let (gate, _) = gate(PolicyConfig {
            approval_threshold: 100.0,
            high_risk: vec!["shell".into()],
            ..Default::default()
        });

        let approved = call("shell", 1.0).with_approval("appr-1");
        let decision = gate.evaluate_and_record(&approved, None).await.unwrap();
        assert_eq!(decision.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_denied_tool_is_blocked_even_with_approval() {
        let (gate, _) = gate(PolicyConfig {
            denied: vec!["wire-transfer".into()],
            ..Default::default()
        });

        let approved = call("wire-transfer", 0.0).with_approval("appr-1");
        let decision = gate.evaluate_and_record(&approved, None).await.unwrap();
        assert_eq!(decision.decision, Decision::Block);
        assert!(decision.reason.contains("deny list"));
    }

    #[tokio::test]
    async fn test_exceeded_cap_blocks_and_names_the_cap() {
        let (gate, ledger) = gate(PolicyConfig {
            approval_threshold: 1_000.0,
            global_caps: SpendCaps {
                daily: Some(100.0),
                ..Default::default()
            },
            ..Default::default()
        });

        let decision = gate
            .evaluate_and_record(&call("messaging", 150.0), None)
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::Block);
        assert!(decision.reason.contains("daily cap 100"));

        // The block itself is on the ledger.
        let receipts = ledger.all().await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].action, ReceiptAction::PolicyEvaluated);
    }

    #[tokio::test]
    async fn test_cumulative_spend_trips_the_cap() {
        let (gate, _) = gate(PolicyConfig {
            approval_threshold: 1_000.0,
            global_caps: SpendCaps {
                daily: Some(100.0),
                ..Default::default()
            },
            ..Default::default()
        });

        for _ in 0..2 {
            let decision = gate
                .evaluate_and_record(&call("messaging", 40.0), None)
                .await
                .unwrap();
            assert_eq!(decision.decision, Decision::Allow);
        }

        // 80 spent; 40 more would cross 100.
        let decision = gate
            .evaluate_and_record(&call("messaging", 40.0), None)
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::Block);
    }

    #[tokio::test]
    async fn test_blocked_calls_are_not_charged() {
        let (gate, _) = gate(PolicyConfig {
            approval_threshold: 1_000.0,
            global_caps: SpendCaps {
                daily: Some(100.0),
                ..Default::default()
            },
            ..Default::default()
        });

        let blocked = gate
            .evaluate_and_record(&call("messaging", 150.0), None)
            .await
            .unwrap();
        assert_eq!(blocked.decision, Decision::Block);

        // The failed attempt must not consume budget.
        let allowed = gate
            .evaluate_and_record(&call("messaging", 90.0), None)
            .await
            .unwrap();
        assert_eq!(allowed.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_per_tool_cap_checked_before_global() {
        let (gate, _) = gate(PolicyConfig {
            approval_threshold: 1_000.0,
            tool_caps: [(
                "messaging".to_string(),
                SpendCaps {
                    daily: Some(10.0),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        });

        let decision = gate
            .evaluate_and_record(&call("messaging", 15.0), None)
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::Block);
        assert!(decision.reason.contains("for tool 'messaging'"));

        // Other tools are unaffected by the per-tool cap.
        let decision = gate
            .evaluate_and_record(&call("records", 15.0), None)
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_auto_approve_skips_threshold() {
        let (gate, _) = gate(PolicyConfig {
            approval_threshold: 1.0,
            auto_approve: vec!["records".into()],
            ..Default::default()
        });

        let decision = gate
            .evaluate_and_record(&call("records", 50.0), None)
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::Allow);

        let decision = gate
            .evaluate_and_record(&call("messaging", 50.0), None)
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::RequireApproval);
    }

    #[tokio::test]
    async fn test_every_decision_lands_on_the_ledger() {
        let (gate, ledger) = gate(PolicyConfig {
            approval_threshold: 10.0,
            ..Default::default()
        });

        gate.evaluate_and_record(&call("a", 1.0), Some(&JobId::new("job-1")))
            .await
            .unwrap();
        gate.evaluate_and_record(&call("b", 100.0), Some(&JobId::new("job-1")))
            .await
            .unwrap();

        let receipts = ledger.query(&JobId::new("job-1")).await.unwrap();
        assert_eq!(receipts.len(), 2);
        assert!(ledger.verify().await.unwrap().ok);
    }
}
