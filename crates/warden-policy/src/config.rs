//! Policy configuration surface.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rolling spend windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapWindow {
    Daily,
    Weekly,
    Monthly,
}

impl CapWindow {
    pub const ALL: [CapWindow; 3] = [CapWindow::Daily, CapWindow::Weekly, CapWindow::Monthly];

    pub fn span(&self) -> Duration {
        match self {
            CapWindow::Daily => Duration::days(1),
            CapWindow::Weekly => Duration::days(7),
            CapWindow::Monthly => Duration::days(30),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CapWindow::Daily => "daily",
            CapWindow::Weekly => "weekly",
            CapWindow::Monthly => "monthly",
        }
    }
}

/// Cap amounts per window. `None` means uncapped.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpendCaps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<f64>,
}

impl SpendCaps {
    pub fn cap_for(&self, window: CapWindow) -> Option<f64> {
        match window {
            CapWindow::Daily => self.daily,
            CapWindow::Weekly => self.weekly,
            CapWindow::Monthly => self.monthly,
        }
    }
}

/// The policy gate's configuration, loadable from JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Cost above which any action requires approval regardless of tool.
    pub approval_threshold: f64,
    /// Tools that always require an approval token (or are denied).
    #[serde(default)]
    pub high_risk: Vec<String>,
    /// Tools that are denied outright, with no approval path.
    #[serde(default)]
    pub denied: Vec<String>,
    /// Tools allowed without a threshold comparison.
    #[serde(default)]
    pub auto_approve: Vec<String>,
    /// Caps applied to total spend across all tools.
    #[serde(default)]
    pub global_caps: SpendCaps,
    /// Caps applied per tool, keyed by capability tag.
    #[serde(default)]
    pub tool_caps: HashMap<String, SpendCaps>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            approval_threshold: 0.0,
            high_risk: Vec::new(),
            denied: Vec::new(),
            auto_approve: Vec::new(),
            global_caps: SpendCaps::default(),
            tool_caps: HashMap::new(),
        }
    }
}

impl PolicyConfig {
    pub fn is_high_risk(&self, tool: &str) -> bool {
        self.high_risk.iter().any(|t| t == tool)
    }

    pub fn is_denied(&self, tool: &str) -> bool {
        self.denied.iter().any(|t| t == tool)
    }

    pub fn is_auto_approved(&self, tool: &str) -> bool {
        self.auto_approve.iter().any(|t| t == tool)
    }
}
