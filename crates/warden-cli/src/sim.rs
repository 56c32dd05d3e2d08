//! Simulated adapters for dry runs.
//!
//! The CLI registers one per capability the definition declares, so a
//! definition can be exercised end to end - gate, ledger, routing -
//! without touching any real external system.

use async_trait::async_trait;
use serde_json::{json, Value};
use warden_executor::{Adapter, AdapterError, AdapterResponse, Governance};

pub struct SimulatedAdapter {
    capability: String,
}

impl SimulatedAdapter {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

#[async_trait]
impl Adapter for SimulatedAdapter {
    fn capability(&self) -> &str {
        &self.capability
    }

    async fn execute(
        &self,
        action: &str,
        params: &Value,
        governance: &Governance,
    ) -> Result<AdapterResponse, AdapterError> {
        tracing::debug!(
            capability = %self.capability,
            action,
            key = %governance.idempotency_key,
            "simulated adapter invoked"
        );
        Ok(AdapterResponse {
            success: true,
            data: json!({
                "status": "ok",
                "simulated": true,
                "capability": self.capability,
                "action": action,
                "params": params,
            }),
            cost: 0.0,
            duration_ms: 0,
        })
    }
}
