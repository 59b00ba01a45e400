//! Cumulative run counters fed to the stopping policy.
//!
//! Updated only by the runner after each stage; stages never touch them.

use serde::Serialize;

use super::types::StageMetrics;

/// Counters for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// API calls spent so far (sum of stage `api_calls`).
    pub api_calls: u64,
    /// Items no earlier stage had produced.
    pub new_unique_items: u64,
    /// Items reported by stages (sum of stage `items_found`).
    pub total_items_seen: u64,
}

impl Stats {
    /// Fold one stage's metrics in; `new_unique` is computed by the caller.
    pub fn record(&mut self, metrics: &StageMetrics, new_unique: u64) {
        self.api_calls = self.api_calls.saturating_add(metrics.api_calls);
        self.total_items_seen = self.total_items_seen.saturating_add(metrics.items_found);
        self.new_unique_items = self.new_unique_items.saturating_add(new_unique);
    }

    /// New-unique / total-seen, or `None` before anything was seen.
    pub fn new_unique_rate(&self) -> Option<f64> {
        if self.total_items_seen == 0 {
            return None;
        }
        Some(self.new_unique_items as f64 / self.total_items_seen as f64)
    }
}
