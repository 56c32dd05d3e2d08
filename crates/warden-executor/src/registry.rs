//! Capability lookup for registered adapters.

use crate::Adapter;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps capability tags to adapter instances. Built once at startup and
/// shared read-only afterwards.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own capability tag. A later
    /// registration for the same tag replaces the earlier one.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters
            .insert(adapter.capability().to_string(), adapter);
    }

    pub fn get(&self, capability: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(capability).cloned()
    }

    pub fn capabilities(&self) -> Vec<&str> {
        let mut caps: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        caps.sort_unstable();
        caps
    }

    /// Check that every capability in `uses` has a registered adapter,
    /// returning the missing tags.
    pub fn missing_capabilities(&self, uses: &[String]) -> Vec<String> {
        uses.iter()
            .filter(|u| !self.adapters.contains_key(u.as_str()))
            .cloned()
            .collect()
    }
}
