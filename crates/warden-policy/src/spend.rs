//! Windowed spend accounting.

use crate::CapWindow;
use chrono::{DateTime, Utc};

/// An explicit, per-gate spend counter. Owned by one [`PolicyGate`]
/// instance and passed by handle, so multiple ledgers or tenants can run
/// in one process without sharing budget state.
///
/// [`PolicyGate`]: crate::PolicyGate
#[derive(Clone, Debug, Default)]
pub struct SpendTracker {
    events: Vec<SpendEvent>,
}

#[derive(Clone, Debug)]
struct SpendEvent {
    tool: String,
    cost: f64,
    at: DateTime<Utc>,
}

impl SpendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record spend for an allowed action.
    pub fn charge(&mut self, tool: &str, cost: f64, at: DateTime<Utc>) {
        if cost <= 0.0 {
            return;
        }
        self.events.push(SpendEvent {
            tool: tool.to_string(),
            cost,
            at,
        });
        self.prune(at);
    }

    /// Total spend inside a rolling window ending at `now`, optionally
    /// restricted to one tool.
    pub fn window_total(&self, window: CapWindow, now: DateTime<Utc>, tool: Option<&str>) -> f64 {
        let since = now - window.span();
        self.events
            .iter()
            .filter(|e| e.at > since && e.at <= now)
            .filter(|e| tool.map_or(true, |t| e.tool == t))
            .map(|e| e.cost)
            .sum()
    }

    // Events older than the widest window cannot affect any cap.
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - CapWindow::Monthly.span();
        self.events.retain(|e| e.at > horizon);
    }
}
